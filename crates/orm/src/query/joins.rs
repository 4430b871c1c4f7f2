//! Query Builder JOIN operations

use crate::backends::IntoArgs;

use super::builder::Query;
use super::types::*;

impl Query {
    /// Add INNER JOIN to the query
    pub fn join(&self, table: &str, left_col: &str, right_col: &str) -> Query {
        self.push_join(JoinType::Inner, table, left_col, right_col)
    }

    /// Add LEFT JOIN to the query
    pub fn left_join(&self, table: &str, left_col: &str, right_col: &str) -> Query {
        self.push_join(JoinType::Left, table, left_col, right_col)
    }

    /// Add RIGHT JOIN to the query
    pub fn right_join(&self, table: &str, left_col: &str, right_col: &str) -> Query {
        self.push_join(JoinType::Right, table, left_col, right_col)
    }

    /// Verbatim join clause, e.g. `JOIN roles ON roles.id = users.role_id AND roles.level > ?`
    pub fn join_raw(&self, sql: &str, args: impl IntoArgs) -> Query {
        let join = Join::Raw {
            sql: sql.to_string(),
            args: args.into_args(),
        };
        self.derive(|c| c.joins.push(join))
    }

    fn push_join(&self, join_type: JoinType, table: &str, left: &str, right: &str) -> Query {
        let join = Join::On {
            join_type,
            table: table.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        };
        self.derive(|c| c.joins.push(join))
    }
}
