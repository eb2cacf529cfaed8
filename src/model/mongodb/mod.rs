mod bson;
mod collection;
mod dump;
mod errors;

pub use bson::Id;
pub use collection::{
    ensure_indexes_exist, Coll, MongoCollection, CHALLENGES, ELECTIONS, MANAGED_COLLECTIONS,
    VOTERS,
};
pub use dump::{dump_database, restore_database};
pub use errors::is_duplicate_key_error;
