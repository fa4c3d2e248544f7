pub mod normalize;
mod types;

pub use types::{
    Download, FileInfo, FileStream, Hint, IndexOptions, OperationOptions, RawDeleteResult,
    RawUpdateResult, ReturnDocument, UpdateCount, UploadOptions,
};
