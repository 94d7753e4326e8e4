pub mod api_keys;
pub mod extractors;
pub mod password;
pub mod token;

pub use extractors::AdminUser;
pub use token::{Claims, TokenKind, TokenSigner};
