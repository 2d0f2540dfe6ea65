//! メモリアクセスの補助関数

use crate::types::VirtAddr;
use crate::Result;

/// ページサイズ
pub const PAGE_SIZE: u64 = 0x1000;

/// 1ワード（PTRACE_PEEKDATA / POKEDATA の単位）のバイト数
pub const WORD_SIZE: usize = 8;

/// 読み取り範囲をページ境界で分割する
///
/// 各要素は `(開始アドレス, 長さ)` です。
/// process_vm_readv はページをまたぐ要求の途中で失敗することがあるため、
/// ページごとに別のiovecとして渡します。
pub fn page_chunks(address: VirtAddr, len: usize) -> Vec<(VirtAddr, usize)> {
    let mut chunks = Vec::new();
    let mut cursor = address.addr();
    let mut remaining = len as u64;

    while remaining > 0 {
        let to_page_end = PAGE_SIZE - (cursor & (PAGE_SIZE - 1));
        let chunk = remaining.min(to_page_end);
        chunks.push((VirtAddr::new(cursor), chunk as usize));
        cursor += chunk;
        remaining -= chunk;
    }

    chunks
}

/// 既存のワードの下位バイトを `head` で置き換える
///
/// 書き込みの末尾で8バイトに満たない部分に使います。
pub fn splice_word(head: &[u8], existing: u64) -> Result<u64> {
    if head.len() > WORD_SIZE {
        anyhow::bail!("Cannot splice {} bytes into a word", head.len());
    }
    let mut bytes = existing.to_le_bytes();
    bytes[..head.len()].copy_from_slice(head);
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_chunks_within_page() {
        let chunks = page_chunks(VirtAddr::new(0x1010), 0x20);
        assert_eq!(chunks, vec![(VirtAddr::new(0x1010), 0x20)]);
        assert!(page_chunks(VirtAddr::new(0x1000), 0).is_empty());
    }

    #[test]
    fn test_page_chunks_across_boundaries() {
        let chunks = page_chunks(VirtAddr::new(0x1ff8), 0x2010);
        assert_eq!(
            chunks,
            vec![
                (VirtAddr::new(0x1ff8), 0x8),
                (VirtAddr::new(0x2000), 0x1000),
                (VirtAddr::new(0x3000), 0x1000),
                (VirtAddr::new(0x4000), 0x8),
            ]
        );
        let total: usize = chunks.iter().map(|(_, len)| len).sum();
        assert_eq!(total, 0x2010);
    }

    #[test]
    fn test_splice_word() {
        let existing = 0x8877665544332211;
        assert_eq!(splice_word(&[0xaa, 0xbb], existing).unwrap(), 0x887766554433bbaa);
        assert_eq!(splice_word(&[], existing).unwrap(), existing);
        assert!(splice_word(&[0; 9], existing).is_err());
    }
}
