pub(crate) mod migrate;
pub(crate) mod query;
pub(crate) mod status;
pub(crate) mod worker_stdio;
