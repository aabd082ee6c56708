pub mod aggregator;
pub mod comparator;
pub mod dsl;
pub mod plan;
pub mod query;
pub mod results;
pub mod sql;

pub use query::{
    AggEntry, AggType, CondType, JoinType, JoinedQuery, OpType, Query, QueryEntry, SortEntry,
};
pub use results::{AggResult, QueryResults};
