// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod datacenters;
pub mod mesh_gateways;
pub mod utils;

pub use utils::*;
