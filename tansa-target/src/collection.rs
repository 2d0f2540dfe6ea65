//! ストップポイントの登録簿

use crate::error::TargetError;
use crate::process::Inferior;
use crate::stoppoint::{Stoppoint, StoppointId};
use crate::tracer::Tracer;
use crate::types::VirtAddr;
use crate::Result;

/// 登録順を保つストップポイントの集合
#[derive(Debug)]
pub struct StoppointCollection<S> {
    stoppoints: Vec<S>,
}

impl<S> Default for StoppointCollection<S> {
    fn default() -> Self {
        Self {
            stoppoints: Vec::new(),
        }
    }
}

impl<S: Stoppoint> StoppointCollection<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, stoppoint: S) -> &mut S {
        self.stoppoints.push(stoppoint);
        let last = self.stoppoints.len() - 1;
        &mut self.stoppoints[last]
    }

    pub fn contains_id(&self, id: StoppointId) -> bool {
        self.stoppoints.iter().any(|s| s.id() == id)
    }

    pub fn contains_address(&self, address: VirtAddr) -> bool {
        self.stoppoints.iter().any(|s| s.at_address(address))
    }

    /// 指定アドレスに有効なストップポイントがあるかどうか
    pub fn enabled_stoppoint_at_address(&self, address: VirtAddr) -> bool {
        self.stoppoints
            .iter()
            .any(|s| s.at_address(address) && s.is_enabled())
    }

    pub fn get_by_id(&self, id: StoppointId) -> Result<&S> {
        self.stoppoints
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| TargetError::UnknownStoppointId(id).into())
    }

    pub(crate) fn get_by_id_mut(&mut self, id: StoppointId) -> Result<&mut S> {
        self.stoppoints
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or_else(|| TargetError::UnknownStoppointId(id).into())
    }

    pub fn get_by_address(&self, address: VirtAddr) -> Result<&S> {
        self.stoppoints
            .iter()
            .find(|s| s.at_address(address))
            .ok_or_else(|| TargetError::UnknownStoppointAddress(address).into())
    }

    pub(crate) fn get_by_address_mut(&mut self, address: VirtAddr) -> Result<&mut S> {
        self.stoppoints
            .iter_mut()
            .find(|s| s.at_address(address))
            .ok_or_else(|| TargetError::UnknownStoppointAddress(address).into())
    }

    /// 無効化してから取り除く
    ///
    /// 無効化に失敗した場合は登録簿に残したままエラーを返します。
    pub(crate) fn remove_by_id<T: Tracer>(
        &mut self,
        id: StoppointId,
        inferior: &mut Inferior<T>,
    ) -> Result<()> {
        let index = self
            .stoppoints
            .iter()
            .position(|s| s.id() == id)
            .ok_or(TargetError::UnknownStoppointId(id))?;
        self.stoppoints[index].disable(inferior)?;
        self.stoppoints.remove(index);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, S> {
        self.stoppoints.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, S> {
        self.stoppoints.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.stoppoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stoppoints.is_empty()
    }

    /// `low <= address < high` のストップポイントを登録順に返す
    pub fn get_in_region(&self, low: VirtAddr, high: VirtAddr) -> Vec<&S> {
        self.stoppoints
            .iter()
            .filter(|s| s.in_range(low, high))
            .collect()
    }
}

impl<'a, S> IntoIterator for &'a StoppointCollection<S> {
    type Item = &'a S;
    type IntoIter = std::slice::Iter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.stoppoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::fake::FakeTracer;

    struct MockStoppoint {
        id: StoppointId,
        address: VirtAddr,
        enabled: bool,
        fail_disable: bool,
    }

    impl MockStoppoint {
        fn new(id: StoppointId, address: u64) -> Self {
            Self {
                id,
                address: VirtAddr::new(address),
                enabled: false,
                fail_disable: false,
            }
        }
    }

    impl Stoppoint for MockStoppoint {
        fn id(&self) -> StoppointId {
            self.id
        }

        fn address(&self) -> VirtAddr {
            self.address
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn enable<T: Tracer>(&mut self, _inferior: &mut Inferior<T>) -> Result<()> {
            self.enabled = true;
            Ok(())
        }

        fn disable<T: Tracer>(&mut self, _inferior: &mut Inferior<T>) -> Result<()> {
            if self.fail_disable {
                anyhow::bail!("disable failed");
            }
            self.enabled = false;
            Ok(())
        }
    }

    fn inferior() -> Inferior<FakeTracer> {
        Inferior::new(FakeTracer::new(0x1000, vec![0; 0x100]), true)
    }

    fn collection() -> StoppointCollection<MockStoppoint> {
        let mut collection = StoppointCollection::new();
        collection.push(MockStoppoint::new(1, 0x1000));
        collection.push(MockStoppoint::new(2, 0x1010));
        collection.push(MockStoppoint::new(3, 0x1020));
        collection
    }

    #[test]
    fn test_lookup() {
        let mut inferior = inferior();
        let mut collection = collection();
        assert_eq!(collection.len(), 3);
        assert!(collection.contains_id(2));
        assert!(!collection.contains_id(4));
        assert!(collection.contains_address(VirtAddr::new(0x1020)));
        assert!(!collection.contains_address(VirtAddr::new(0x1021)));

        assert_eq!(collection.get_by_address(VirtAddr::new(0x1010)).unwrap().id(), 2);
        let err = collection.get_by_id(9).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TargetError>(),
            Some(TargetError::UnknownStoppointId(9))
        ));
        assert!(collection.get_by_address(VirtAddr::new(0x2000)).is_err());

        assert!(!collection.enabled_stoppoint_at_address(VirtAddr::new(0x1010)));
        collection.get_by_id_mut(2).unwrap().enable(&mut inferior).unwrap();
        assert!(collection.enabled_stoppoint_at_address(VirtAddr::new(0x1010)));
    }

    #[test]
    fn test_remove_disables_first() {
        let mut inferior = inferior();
        let mut collection = collection();
        collection.get_by_id_mut(1).unwrap().enable(&mut inferior).unwrap();

        collection.remove_by_id(1, &mut inferior).unwrap();
        assert!(!collection.contains_id(1));
        collection.remove_by_id(3, &mut inferior).unwrap();
        assert!(!collection.contains_address(VirtAddr::new(0x1020)));
        assert_eq!(collection.len(), 1);
        assert!(collection.remove_by_id(1, &mut inferior).is_err());
    }

    #[test]
    fn test_failed_disable_keeps_stoppoint() {
        let mut inferior = inferior();
        let mut collection = collection();
        collection.get_by_id_mut(2).unwrap().fail_disable = true;

        assert!(collection.remove_by_id(2, &mut inferior).is_err());
        assert!(collection.contains_id(2));
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_region_and_order() {
        let collection = collection();
        let ids: Vec<_> = collection.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let in_region: Vec<_> = collection
            .get_in_region(VirtAddr::new(0x1001), VirtAddr::new(0x1020))
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(in_region, vec![2]);

        let all: Vec<_> = (&collection).into_iter().map(|s| s.address().addr()).collect();
        assert_eq!(all, vec![0x1000, 0x1010, 0x1020]);
        assert!(StoppointCollection::<MockStoppoint>::new().is_empty());
    }
}
