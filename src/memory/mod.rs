pub(crate) mod bits;
pub(crate) mod block;
pub(crate) mod buddy;
pub(crate) mod error;
pub(crate) mod free_list;
pub(crate) mod heap;
pub(crate) mod integration;
pub(crate) mod raw;
pub(crate) mod region;
pub(crate) mod scratch;
pub(crate) mod stats;
