//! Cache tagging, lifetime resolution and purge broadcasting for a CMS that
//! sits behind Varnish with the xkey vmod.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
