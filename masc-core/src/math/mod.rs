mod bounds;
pub use self::bounds::*;

mod morton_index;
pub use self::morton_index::*;

mod bitmanip;
pub use self::bitmanip::*;

mod minmax;
pub use self::minmax::*;
