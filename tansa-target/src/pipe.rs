//! プロセス間通信用の匿名パイプ

use crate::error::{IoContext, OsContext};
use crate::Result;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

/// 1回の読み取りで受け取る最大バイト数
const READ_CHUNK: usize = 1024;

/// 読み取り端と書き込み端を個別に閉じられるパイプ
///
/// 子プロセス起動時のエラー中継や、子プロセスの標準出力の受け取りに使います。
#[derive(Debug)]
pub struct Pipe {
    read: Option<File>,
    write: Option<File>,
}

impl Pipe {
    /// パイプを作成する
    ///
    /// `close_on_exec` が真ならexec時に両端が自動的に閉じられます。
    pub fn new(close_on_exec: bool) -> Result<Self> {
        let flags = if close_on_exec {
            OFlag::O_CLOEXEC
        } else {
            OFlag::empty()
        };
        let (read, write) = pipe2(flags).os_context("Pipe creation failed")?;
        Ok(Self {
            read: Some(File::from(read)),
            write: Some(File::from(write)),
        })
    }

    pub fn read_fd(&self) -> Option<RawFd> {
        self.read.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn write_fd(&self) -> Option<RawFd> {
        self.write.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn close_read(&mut self) {
        self.read = None;
    }

    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// 届いているデータを1回だけ読み取る（最大1024バイト）
    ///
    /// 書き込み端がすべて閉じられていれば空のバイト列を返します。
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let file = self
            .read
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Could not read from pipe: read end is closed"))?;
        let mut buffer = vec![0u8; READ_CHUNK];
        let len = file.read(&mut buffer).io_context("Could not read from pipe")?;
        buffer.truncate(len);
        Ok(buffer)
    }

    /// 書き込み端がすべて閉じられるまで読み取る
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let file = self
            .read
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Could not read from pipe: read end is closed"))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).io_context("Could not read from pipe")?;
        Ok(buffer)
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .write
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Could not write to pipe: write end is closed"))?;
        file.write_all(bytes).io_context("Could not write to pipe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut pipe = Pipe::new(false).unwrap();
        pipe.write(b"hello").unwrap();
        assert_eq!(pipe.read().unwrap(), b"hello");
    }

    #[test]
    fn test_read_to_end_after_close() {
        let mut pipe = Pipe::new(true).unwrap();
        pipe.write(b"Exec failed: ").unwrap();
        pipe.write(b"No such file or directory").unwrap();
        pipe.close_write();
        assert_eq!(pipe.read_to_end().unwrap(), b"Exec failed: No such file or directory");

        // 書き込み端が閉じていれば空を返す
        assert!(pipe.read().unwrap().is_empty());
    }

    #[test]
    fn test_closed_ends() {
        let mut pipe = Pipe::new(true).unwrap();
        assert!(pipe.read_fd().is_some());
        assert!(pipe.write_fd().is_some());

        pipe.close_read();
        assert!(pipe.read_fd().is_none());
        assert!(pipe.read().is_err());

        pipe.close_write();
        assert!(pipe.write_fd().is_none());
        assert!(pipe.write(b"x").is_err());
    }
}
