//! `realm_shared`
//!
//! Shared libraries for the tile-realm client and anything that speaks its
//! wire contract.
//!
//! Design goals:
//! - Strict, lossless tile keys (`"x, y"` is also the network key).
//! - Data types that deserialize straight from authored content.
//! - Framing that runs over any async byte stream.
//! - No `unsafe`.

pub mod config;
pub mod event;
pub mod math;
pub mod net;
pub mod realm;
pub mod sprite;
pub mod tile;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::realm::*;
    pub use crate::sprite::*;
    pub use crate::tile::*;
}
