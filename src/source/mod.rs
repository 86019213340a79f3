// Archive source abstraction: the upstream the proxy fetches from.

pub mod orthanc_source;
pub mod traits;
