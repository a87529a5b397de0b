//! Object-store limits the upload pipeline has to respect.
//!
//! Values follow the S3 multipart quotas; S3-compatible providers use the same
//! ceilings.

/// Largest single object the provider accepts (5 TiB).
pub const MAX_OBJECT_SIZE_BYTES: u64 = 5_497_558_138_880;

/// Parts are numbered 1..=10_000.
pub const MAX_PARTS_PER_UPLOAD: u64 = 10_000;

/// Lower bound for the part size handed to clients (64 MiB).
pub const MIN_RECOMMENDED_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Keys returned by a single ListObjectsV2 page.
pub const MAX_KEYS_PER_PAGE: i32 = 1_000;

/// Keys accepted by a single DeleteObjects call.
pub const MAX_KEYS_PER_DELETE: usize = 1_000;
