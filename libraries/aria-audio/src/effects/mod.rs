//! Built-in pipeline stages
//!
//! Each module provides one stage type: its settings, its `Stage`
//! implementation, and its registry descriptor. Stages are addressed through
//! the registry by type name; none of these types are part of the public
//! API.

pub(crate) mod convert;
pub(crate) mod pan;
pub(crate) mod resample;
pub(crate) mod speed;
pub(crate) mod volume;
