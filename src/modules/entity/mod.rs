pub mod crud;
pub mod model;

pub use crud::EntityCrud;
pub use model::TrackedEntity;
