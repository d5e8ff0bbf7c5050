use std::fmt::Display;

use log::debug;

use super::PointCloud;
use crate::index::Octree;

/// Handle of a point cloud inside a [`CloudStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudId(usize);

impl CloudId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for CloudId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cloud#{}", self.0)
    }
}

struct StoreEntry {
    cloud: PointCloud,
    octree: Option<Octree>,
}

/// Append-only arena of point clouds. Each cloud can carry a lazily built [`Octree`] that is reused by every
/// spatial query against that cloud
#[derive(Default)]
pub struct CloudStore {
    entries: Vec<StoreEntry>,
}

impl CloudStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds `cloud` to this store and returns its handle
    pub fn insert(&mut self, cloud: PointCloud) -> CloudId {
        self.entries.push(StoreEntry {
            cloud,
            octree: None,
        });
        CloudId(self.entries.len() - 1)
    }

    /// Returns the number of clouds in this store
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all handles in insertion order
    pub fn ids(&self) -> impl Iterator<Item = CloudId> {
        (0..self.entries.len()).map(CloudId)
    }

    /// Returns the cloud with the given handle
    ///
    /// # Panics
    ///
    /// If `id` was not created by this store
    pub fn cloud(&self, id: CloudId) -> &PointCloud {
        &self.entries[id.0].cloud
    }

    /// Returns the cloud with the given handle mutably. Positions can't be changed through this reference, so a
    /// cached octree stays valid
    ///
    /// # Panics
    ///
    /// If `id` was not created by this store
    pub fn cloud_mut(&mut self, id: CloudId) -> &mut PointCloud {
        &mut self.entries[id.0].cloud
    }

    /// Looks up a cloud by its name
    pub fn find_by_name(&self, name: &str) -> Option<CloudId> {
        self.entries
            .iter()
            .position(|entry| entry.cloud.name() == name)
            .map(CloudId)
    }

    /// Builds the octree of the given cloud if it doesn't exist yet
    pub fn ensure_octree(&mut self, id: CloudId) -> &Octree {
        let entry = &mut self.entries[id.0];
        let cloud = &entry.cloud;
        entry.octree.get_or_insert_with(|| {
            debug!(
                "Building octree for cloud {} ({} points)",
                cloud.name(),
                cloud.len()
            );
            Octree::build(cloud.positions())
        })
    }

    /// Returns the octree of the given cloud if it was built before
    pub fn octree(&self, id: CloudId) -> Option<&Octree> {
        self.entries[id.0].octree.as_ref()
    }

    /// Returns `true` if the octree of the given cloud was built
    pub fn has_octree(&self, id: CloudId) -> bool {
        self.entries[id.0].octree.is_some()
    }

    /// Removes the cloud with the given handle from this store and returns it. The slot stays occupied by an
    /// empty cloud so that all other handles remain valid
    pub fn take(&mut self, id: CloudId) -> PointCloud {
        let entry = &mut self.entries[id.0];
        entry.octree = None;
        std::mem::take(&mut entry.cloud)
    }
}
