/// Max length of the requester-supplied contact field.
pub const MAX_CONTACT_LEN: usize = 256;

/// Max length of the requester-supplied comments field.
pub const MAX_COMMENTS_LEN: usize = 2_000;

/// Max length of a rating comment.
pub const MAX_RATING_COMMENT_LEN: usize = 1_000;

/// Max number of image references attached to one rating.
pub const MAX_RATING_IMAGES: usize = 8;

/// Max length of an image content hash (hex).
pub const MAX_IMAGE_HASH_LEN: usize = 128;

/// Lowest accepted rating score.
pub const MIN_RATING: u8 = 1;

/// Highest accepted rating score.
pub const MAX_RATING: u8 = 5;

/// Longest booking, in days (inclusive of both ends).
pub const MAX_BOOKING_DAYS: i64 = 365;

/// Bookings retained per tool, terminal ones included.
pub const MAX_BOOKINGS_PER_TOOL: usize = 100_000;

/// Max items returned by one listing page.
pub const MAX_PAGE_SIZE: usize = 200;
