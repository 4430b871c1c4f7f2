//! Query Builder ORDER BY and GROUP BY operations

use super::builder::Query;
use super::types::*;

impl Query {
    /// Add ORDER BY clause
    pub fn order_by(&self, column: &str) -> Query {
        self.push_order(Order::Column {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        })
    }

    /// Add ORDER BY clause with DESC
    pub fn order_by_desc(&self, column: &str) -> Query {
        self.push_order(Order::Column {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        })
    }

    pub fn order_raw(&self, sql: &str) -> Query {
        self.push_order(Order::Raw(sql.to_string()))
    }

    /// Random ordering in the connection's dialect
    pub fn in_random_order(&self) -> Query {
        self.push_order(Order::Random)
    }

    /// Add GROUP BY clause
    pub fn group_by(&self, column: &str) -> Query {
        let column = column.to_string();
        self.derive(|c| c.group_by.push(column))
    }

    fn push_order(&self, order: Order) -> Query {
        self.derive(|c| c.order_by.push(order))
    }
}
