//! Both ends of a presentation.
//!
//! [device] builds the `DeviceResponse` a holder sends. [reader] verifies it and reports each
//! check through the types in [authentication].
pub mod authentication;
pub mod device;
pub mod reader;
