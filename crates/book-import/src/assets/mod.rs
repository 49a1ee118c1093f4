mod uploader;

pub use uploader::{storage_key, AssetUploadError, AssetUploadReport, AssetUploader};
