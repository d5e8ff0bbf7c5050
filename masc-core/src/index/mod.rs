mod octree;
pub use self::octree::*;
