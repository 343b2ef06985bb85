pub mod repo;
pub mod supabase;

pub use repo::Repository;
pub use supabase::{StoreError, SupabaseClient};
