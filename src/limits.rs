/// Maximum length of the owner field, in bytes.
pub const MAX_OWNER_LEN: usize = 128;

/// Maximum length of the task kind field, in bytes.
pub const MAX_TASK_KIND_LEN: usize = 256;

/// Maximum length of a compute or GPU descriptor (`"0,1,2"`, `"all"`, ...).
pub const MAX_DESCRIPTOR_LEN: usize = 256;

/// Maximum length of an estimated or actual duration text.
pub const MAX_DURATION_TEXT_LEN: usize = 64;

/// Maximum rows kept in a single pool's records.
pub const MAX_ROWS_PER_POOL: usize = 100_000;
