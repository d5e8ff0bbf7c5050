pub mod fields;

mod point_cloud;
pub use self::point_cloud::*;

mod scalar_field;
pub use self::scalar_field::*;

mod store;
pub use self::store::*;
