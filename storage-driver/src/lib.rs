mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::ReadHandle;
pub use driver::Reader;
pub use driver::Writer;
pub use error::StorageError;
pub use error::StorageErrorBuilder;
pub use error::StorageErrorKind;
