//! Parameterized SQL builders
//!
//! Identifiers are always quoted and values always travel as bound parameters. Callers are
//! expected to have checked column names against the schema before building; the builders
//! only guarantee that nothing they emit can break out of an identifier or literal.

use super::schema::quote_ident;
use super::value::Value;

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (<> or !=)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// LIKE pattern matching
    Like,
    /// IN set membership
    In,
    /// IS NULL
    IsNull,
    /// IS NOT NULL
    IsNotNull,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

/// A single comparison on one column
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    column: String,
    operator: Operator,
    values: Vec<Value>,
}

impl Condition {
    /// Column the condition applies to
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Comparison operator
    pub fn operator(&self) -> Operator {
        self.operator
    }

    fn render(&self, qualifier: Option<&str>, params: &mut Vec<Value>) -> String {
        let column = qualify(qualifier, &self.column);
        match self.operator {
            Operator::IsNull | Operator::IsNotNull => {
                format!("{} {}", column, self.operator.as_sql())
            }
            Operator::Eq if self.values.first().is_some_and(Value::is_null) => {
                format!("{} IS NULL", column)
            }
            Operator::Ne if self.values.first().is_some_and(Value::is_null) => {
                format!("{} IS NOT NULL", column)
            }
            // An empty set matches nothing
            Operator::In if self.values.is_empty() => "0 = 1".to_string(),
            Operator::In => {
                params.extend(self.values.iter().cloned());
                format!("{} IN ({})", column, placeholders(self.values.len()))
            }
            _ => {
                params.extend(self.values.iter().cloned());
                format!("{} {} ?", column, self.operator.as_sql())
            }
        }
    }
}

/// Conjunction of column comparisons
///
/// ```
/// use rust_orm_system::core::query_builder::Filter;
///
/// let filter = Filter::new().eq("name", "john").not_null("teamId");
/// let (sql, params) = filter.render(None);
/// assert_eq!(sql, "\"name\" = ? AND \"teamId\" IS NOT NULL");
/// assert_eq!(params.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Empty filter (matches every row)
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, operator: Operator, values: Vec<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            operator,
            values,
        });
        self
    }

    /// column = value (`IS NULL` for a null value)
    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Eq, vec![value.into()])
    }

    /// column != value
    #[must_use]
    pub fn ne(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Ne, vec![value.into()])
    }

    /// column > value
    #[must_use]
    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Gt, vec![value.into()])
    }

    /// column >= value
    #[must_use]
    pub fn ge(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Ge, vec![value.into()])
    }

    /// column < value
    #[must_use]
    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Lt, vec![value.into()])
    }

    /// column <= value
    #[must_use]
    pub fn le(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Operator::Le, vec![value.into()])
    }

    /// column LIKE pattern
    #[must_use]
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.push(column, Operator::Like, vec![Value::from(pattern)])
    }

    /// column IN (values)
    #[must_use]
    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(
            column,
            Operator::In,
            values.into_iter().map(Into::into).collect(),
        )
    }

    /// column IS NULL
    #[must_use]
    pub fn is_null(self, column: &str) -> Self {
        self.push(column, Operator::IsNull, Vec::new())
    }

    /// column IS NOT NULL
    #[must_use]
    pub fn not_null(self, column: &str) -> Self {
        self.push(column, Operator::IsNotNull, Vec::new())
    }

    /// Whether the filter has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Conditions in insertion order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Columns referenced by the filter
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|c| c.column.as_str())
    }

    /// Render as an SQL boolean expression; `1 = 1` when empty
    pub fn render(&self, qualifier: Option<&str>) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        if self.conditions.is_empty() {
            return ("1 = 1".to_string(), params);
        }
        let sql = self
            .conditions
            .iter()
            .map(|c| c.render(qualifier, &mut params))
            .collect::<Vec<_>>()
            .join(" AND ");
        (sql, params)
    }
}

/// JOIN types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN
    Inner,
}

impl JoinType {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
        }
    }
}

/// JOIN clause
#[derive(Debug, Clone)]
struct Join {
    join_type: JoinType,
    table: String,
    alias: String,
    on_condition: String,
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    alias: Option<String>,
    columns: Vec<String>,
    raw_columns: bool,
    joins: Vec<Join>,
    where_clauses: Vec<String>,
    params: Vec<Value>,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use rust_orm_system::core::query_builder::SelectBuilder;
    ///
    /// let query = SelectBuilder::new("players")
    ///     .columns(&["id", "name"])
    ///     .build();
    /// assert_eq!(query, "SELECT \"id\", \"name\" FROM \"players\"");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            raw_columns: false,
            joins: Vec::new(),
            where_clauses: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Alias the main table; columns and filters are then qualified with it
    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Select specific columns
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Select a raw expression such as `COUNT(*)`
    #[must_use]
    pub fn expression(mut self, expression: &str) -> Self {
        self.columns = vec![expression.to_string()];
        self.raw_columns = true;
        self
    }

    /// Add filter conditions, qualified with the table alias
    #[must_use]
    pub fn filter(mut self, filter: &Filter) -> Self {
        if !filter.is_empty() {
            let (sql, params) = filter.render(self.alias.as_deref());
            self.where_clauses.push(sql);
            self.params.extend(params);
        }
        self
    }

    /// Add a pre-rendered condition with its parameters
    #[must_use]
    pub fn where_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.where_clauses.push(sql.into());
        self.params.extend(params);
        self
    }

    /// Add a join; `on_condition` is emitted as is
    #[must_use]
    pub fn join(
        mut self,
        join_type: JoinType,
        table: &str,
        alias: &str,
        on_condition: &str,
    ) -> Self {
        self.joins.push(Join {
            join_type,
            table: table.to_string(),
            alias: alias.to_string(),
            on_condition: on_condition.to_string(),
        });
        self
    }

    /// Add ORDER BY clause
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    /// Add LIMIT clause
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add OFFSET clause
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let qualifier = self.alias.as_deref();
        let columns = if self.raw_columns {
            self.columns.join(", ")
        } else if self.columns.is_empty() {
            match qualifier {
                Some(alias) => format!("{}.*", quote_ident(alias)),
                None => "*".to_string(),
            }
        } else {
            self.columns
                .iter()
                .map(|c| qualify(qualifier, c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(&self.table));
        if let Some(alias) = qualifier {
            sql.push_str(&format!(" AS {}", quote_ident(alias)));
        }

        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} AS {} ON {}",
                join.join_type.as_sql(),
                quote_ident(&join.table),
                quote_ident(&join.alias),
                join.on_condition
            ));
        }

        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order_clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(col, dir)| format!("{} {}", qualify(qualifier, col), dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_clauses.join(", "));
        }

        // SQLite only accepts OFFSET after a LIMIT
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }

    /// Get the parameter values in placeholder order
    pub fn params(&self) -> Vec<Value> {
        self.params.clone()
    }
}

/// INSERT query builder; several rows share one column list
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl InsertBuilder {
    /// Create a new INSERT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Add a column-value pair to a single-row insert
    #[must_use]
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.push(column.to_string());
        match self.rows.first_mut() {
            Some(row) => row.push(value.into()),
            None => self.rows.push(vec![value.into()]),
        }
        self
    }

    /// Set the column list for a multi-row insert
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Append one row; values follow the column list order
    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        if self.columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table));
        }
        let tuple = format!("({})", placeholders(self.columns.len()));
        let tuples = vec![tuple.as_str(); self.rows.len().max(1)];
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(&self.table),
            self.columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            tuples.join(", ")
        )
    }

    /// Get the parameter values, row by row
    pub fn params(&self) -> Vec<Value> {
        self.rows.iter().flatten().cloned().collect()
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_columns: Vec<String>,
    set_values: Vec<Value>,
    filter: Filter,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_columns: Vec::new(),
            set_values: Vec::new(),
            filter: Filter::new(),
        }
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set_columns.push(column.to_string());
        self.set_values.push(value.into());
        self
    }

    /// Restrict the rows updated
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.conditions.extend(filter.conditions);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let set_clauses: Vec<String> = self
            .set_columns
            .iter()
            .map(|col| format!("{} = ?", quote_ident(col)))
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_ident(&self.table),
            set_clauses.join(", ")
        );
        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.render(None).0);
        }
        sql
    }

    /// Get the parameter values (SET values followed by WHERE values)
    pub fn params(&self) -> Vec<Value> {
        let mut params = self.set_values.clone();
        params.extend(self.filter.render(None).1);
        params
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filter: Filter,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::new(),
        }
    }

    /// Restrict the rows deleted
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.conditions.extend(filter.conditions);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.table));
        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.render(None).0);
        }
        sql
    }

    /// Get the parameter values
    pub fn params(&self) -> Vec<Value> {
        self.filter.render(None).1
    }
}

/// Quote a column, qualified with a table alias when one is given
pub fn qualify(qualifier: Option<&str>, column: &str) -> String {
    match qualifier {
        Some(alias) => format!("{}.{}", quote_ident(alias), quote_ident(column)),
        None => quote_ident(column),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
