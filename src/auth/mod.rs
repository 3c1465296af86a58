pub mod claims;
pub mod errors;
pub mod extractors;
pub mod jwt;

pub use claims::*;
pub use errors::*;
pub use extractors::*;
pub use jwt::*;