//! Part sizing for direct-to-storage multipart uploads.

use crate::{
    models::multipart::CompletedPartInput,
    services::{ServiceError, ServiceResult},
    storage::{
        UploadedPart,
        limits::{MAX_PARTS_PER_UPLOAD, MIN_RECOMMENDED_PART_SIZE},
    },
};

/// Part size handed to the browser for a file of `size` bytes.
///
/// At least 64 MiB, and large enough that the file never needs more than
/// 10 000 parts.
pub fn recommended_part_size(size: u64) -> u64 {
    MIN_RECOMMENDED_PART_SIZE.max(size.div_ceil(MAX_PARTS_PER_UPLOAD))
}

/// Number of parts a file of `size` bytes splits into. Empty files still
/// upload one (empty) part.
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size).max(1)
}

/// Sort the client-reported parts by number and reject lists the provider
/// would refuse.
pub fn sorted_parts(parts: &[CompletedPartInput]) -> ServiceResult<Vec<UploadedPart>> {
    if parts.is_empty() {
        return Err(ServiceError::validation("at least one part is required"));
    }

    let mut sorted: Vec<UploadedPart> = parts
        .iter()
        .map(|part| UploadedPart {
            part_number: part.part_number,
            etag: part.tag.clone(),
        })
        .collect();
    sorted.sort_by_key(|part| part.part_number);

    for (idx, part) in sorted.iter().enumerate() {
        if part.part_number < 1 || part.part_number as u64 > MAX_PARTS_PER_UPLOAD {
            return Err(ServiceError::validation(format!(
                "part number {} is outside 1..={}",
                part.part_number, MAX_PARTS_PER_UPLOAD
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(ServiceError::validation(format!(
                "part {} is missing its tag",
                part.part_number
            )));
        }
        if idx > 0 && sorted[idx - 1].part_number == part.part_number {
            return Err(ServiceError::validation(format!(
                "part {} listed twice",
                part.part_number
            )));
        }
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::limits::MAX_OBJECT_SIZE_BYTES;

    const MIB: u64 = 1024 * 1024;

    fn part(n: i32, tag: &str) -> CompletedPartInput {
        CompletedPartInput {
            part_number: n,
            tag: tag.into(),
        }
    }

    #[test]
    fn test_part_size_covers_file_within_part_ceiling() {
        let sizes = [
            0,
            1,
            200 * MIB,
            64 * MIB,
            64 * MIB + 1,
            640_000 * MIB,
            640_000 * MIB + 1,
            MAX_OBJECT_SIZE_BYTES,
        ];
        for size in sizes {
            let part = recommended_part_size(size);
            let count = part_count(size, part);
            assert!(part >= MIN_RECOMMENDED_PART_SIZE, "size {}", size);
            assert!(part * count >= size, "size {}", size);
            assert!(count <= MAX_PARTS_PER_UPLOAD, "size {}", size);
        }
    }

    #[test]
    fn test_two_hundred_megabytes_uses_minimum_part() {
        let size = 200 * MIB;
        let part = recommended_part_size(size);
        assert_eq!(part, 64 * MIB);
        assert_eq!(part_count(size, part), 4);
    }

    #[test]
    fn test_empty_file_has_one_part() {
        assert_eq!(part_count(0, recommended_part_size(0)), 1);
    }

    #[test]
    fn test_sorted_parts_orders_by_number() {
        let sorted = sorted_parts(&[part(3, "c"), part(1, "a"), part(2, "b")]).unwrap();
        let numbers: Vec<i32> = sorted.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(sorted[0].etag, "a");
    }

    #[test]
    fn test_sorted_parts_rejects_bad_lists() {
        assert!(sorted_parts(&[]).is_err());
        assert!(sorted_parts(&[part(0, "a")]).is_err());
        assert!(sorted_parts(&[part(10_001, "a")]).is_err());
        assert!(sorted_parts(&[part(1, "a"), part(1, "b")]).is_err());
        assert!(sorted_parts(&[part(1, " ")]).is_err());
    }
}
