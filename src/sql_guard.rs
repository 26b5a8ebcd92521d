//! SQL safety gate.
//!
//! Every candidate query produced by language inference passes through
//! `validate` before it is allowed anywhere near a connection. The gate is
//! pure: it parses and inspects, it never executes. It runs before every
//! execution, including re-runs of previously validated text, because the
//! schema it is checked against may have changed in between.

use crate::schema::SchemaDescription;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, GroupByExpr, Join, JoinConstraint, JoinOperator, Query,
    Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Why a candidate query was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MultipleStatements,
    NotSelect,
    NotReadOnly(String),
    ForbiddenKeyword(String),
    UnknownIdentifier(String),
    Unparseable(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MultipleStatements => write!(f, "more than one statement"),
            RejectReason::NotSelect => write!(f, "statement is not a SELECT"),
            RejectReason::NotReadOnly(what) => write!(f, "not read-only: {}", what),
            RejectReason::ForbiddenKeyword(kw) => write!(f, "forbidden keyword: {}", kw),
            RejectReason::UnknownIdentifier(id) => write!(f, "unknown identifier: {}", id),
            RejectReason::Unparseable(msg) => write!(f, "unparseable query: {}", msg),
        }
    }
}

lazy_static! {
    static ref DENYLIST: Regex = Regex::new(
        r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|GRANT|REVOKE)\b",
    )
    .expect("denylist pattern is valid");
}

/// Validate a candidate query against the schema it would run over.
pub fn validate(sql: &str, schema: &SchemaDescription) -> Result<(), RejectReason> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(RejectReason::Unparseable("empty statement".to_string()));
    }
    if trimmed.contains(';') {
        return Err(RejectReason::MultipleStatements);
    }

    let first_word = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    if first_word != "SELECT" {
        return Err(RejectReason::NotSelect);
    }

    if let Some(hit) = DENYLIST.find(trimmed) {
        return Err(RejectReason::ForbiddenKeyword(
            hit.as_str().to_uppercase(),
        ));
    }

    let statements = Parser::parse_sql(&GenericDialect {}, trimmed)
        .map_err(|e| RejectReason::Unparseable(e.to_string()))?;
    if statements.len() != 1 {
        return Err(RejectReason::MultipleStatements);
    }

    match &statements[0] {
        Statement::Query(query) => check_query(query, schema),
        _ => Err(RejectReason::NotSelect),
    }
}

/// A table the query reads from, resolved to schema knowledge. Derived
/// tables (subqueries in FROM) get validated on their own and are then
/// treated as opaque: any column qualified by their alias is accepted.
struct TableRef {
    names: Vec<String>,
    opaque: bool,
}

fn check_query(query: &Query, schema: &SchemaDescription) -> Result<(), RejectReason> {
    // FOR UPDATE / FOR SHARE take row locks through a SELECT.
    if !query.locks.is_empty() {
        return Err(RejectReason::NotReadOnly("locking clause".to_string()));
    }
    match query.body.as_ref() {
        SetExpr::Select(select) => check_select(select, schema, &query.order_by)?,
        SetExpr::Query(inner) => check_query(inner, schema)?,
        _ => return Err(RejectReason::NotSelect),
    }
    Ok(())
}

fn check_select(
    select: &Select,
    schema: &SchemaDescription,
    order_by: &[sqlparser::ast::OrderByExpr],
) -> Result<(), RejectReason> {
    // SELECT INTO creates its target table despite the SELECT keyword.
    if select.into.is_some() {
        return Err(RejectReason::NotReadOnly("SELECT INTO".to_string()));
    }

    let mut tables = Vec::new();
    for twj in &select.from {
        collect_tables(twj, schema, &mut tables)?;
    }

    let mut aliases = Vec::new();
    for item in &select.projection {
        if let SelectItem::ExprWithAlias { alias, .. } = item {
            aliases.push(alias.value.to_lowercase());
        }
    }

    let ctx = Scope {
        schema,
        tables: &tables,
        aliases: &aliases,
    };

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                ctx.check_expr(expr)?;
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = name
                    .0
                    .first()
                    .map(|i| i.value.to_lowercase())
                    .unwrap_or_default();
                if !tables.iter().any(|t| t.names.contains(&qualifier)) {
                    return Err(RejectReason::UnknownIdentifier(qualifier));
                }
            }
            SelectItem::Wildcard(_) => {}
        }
    }

    for twj in &select.from {
        for join in &twj.joins {
            ctx.check_join(join)?;
        }
    }

    if let Some(expr) = &select.selection {
        ctx.check_expr(expr)?;
    }
    if let GroupByExpr::Expressions(exprs) = &select.group_by {
        for expr in exprs {
            ctx.check_expr(expr)?;
        }
    }
    if let Some(expr) = &select.having {
        ctx.check_expr(expr)?;
    }
    for ob in order_by {
        ctx.check_expr(&ob.expr)?;
    }

    Ok(())
}

fn collect_tables(
    twj: &TableWithJoins,
    schema: &SchemaDescription,
    out: &mut Vec<TableRef>,
) -> Result<(), RejectReason> {
    collect_factor(&twj.relation, schema, out)?;
    for join in &twj.joins {
        collect_factor(&join.relation, schema, out)?;
    }
    Ok(())
}

fn collect_factor(
    factor: &TableFactor,
    schema: &SchemaDescription,
    out: &mut Vec<TableRef>,
) -> Result<(), RejectReason> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = name
                .0
                .last()
                .map(|i| i.value.clone())
                .unwrap_or_default();
            if !schema.has_table(&table_name) {
                return Err(RejectReason::UnknownIdentifier(table_name));
            }
            let mut names = vec![table_name.to_lowercase()];
            if let Some(alias) = alias {
                names.push(alias.name.value.to_lowercase());
            }
            out.push(TableRef {
                names,
                opaque: false,
            });
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            check_query(subquery, schema)?;
            let mut names = Vec::new();
            if let Some(alias) = alias {
                names.push(alias.name.value.to_lowercase());
            }
            out.push(TableRef { names, opaque: true });
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_tables(table_with_joins, schema, out)?;
        }
        _ => {
            return Err(RejectReason::Unparseable(
                "unsupported table expression".to_string(),
            ))
        }
    }
    Ok(())
}

struct Scope<'a> {
    schema: &'a SchemaDescription,
    tables: &'a [TableRef],
    aliases: &'a [String],
}

impl Scope<'_> {
    fn check_join(&self, join: &Join) -> Result<(), RejectReason> {
        let constraint = match &join.join_operator {
            JoinOperator::Inner(c)
            | JoinOperator::LeftOuter(c)
            | JoinOperator::RightOuter(c)
            | JoinOperator::FullOuter(c) => c,
            _ => return Ok(()),
        };
        match constraint {
            JoinConstraint::On(expr) => self.check_expr(expr),
            JoinConstraint::Using(idents) => {
                for ident in idents {
                    self.check_column(&ident.value)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_expr(&self, expr: &Expr) -> Result<(), RejectReason> {
        match expr {
            Expr::Identifier(ident) => self.check_column(&ident.value),
            Expr::CompoundIdentifier(parts) => {
                if parts.len() < 2 {
                    return Ok(());
                }
                let qualifier = parts[parts.len() - 2].value.to_lowercase();
                let column = &parts[parts.len() - 1].value;
                let table = self
                    .tables
                    .iter()
                    .find(|t| t.names.contains(&qualifier))
                    .ok_or_else(|| RejectReason::UnknownIdentifier(qualifier.clone()))?;
                if table.opaque {
                    return Ok(());
                }
                let known = table
                    .names
                    .iter()
                    .any(|n| self.schema.has_column(n, column));
                if known {
                    Ok(())
                } else {
                    Err(RejectReason::UnknownIdentifier(format!(
                        "{}.{}",
                        qualifier, column
                    )))
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.check_expr(left)?;
                self.check_expr(right)
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.check_expr(expr),
            Expr::Cast { expr, .. } => self.check_expr(expr),
            Expr::IsNull(expr) | Expr::IsNotNull(expr) => self.check_expr(expr),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.check_expr(expr)?;
                self.check_expr(low)?;
                self.check_expr(high)
            }
            Expr::InList { expr, list, .. } => {
                self.check_expr(expr)?;
                for item in list {
                    self.check_expr(item)?;
                }
                Ok(())
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.check_expr(expr)?;
                check_query(subquery, self.schema)
            }
            Expr::Subquery(subquery) => check_query(subquery, self.schema),
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.check_expr(expr)?;
                self.check_expr(pattern)
            }
            Expr::Function(func) => {
                for arg in &func.args {
                    let arg_expr = match arg {
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::Unnamed(arg) => arg,
                    };
                    match arg_expr {
                        FunctionArgExpr::Expr(expr) => self.check_expr(expr)?,
                        FunctionArgExpr::Wildcard
                        | FunctionArgExpr::QualifiedWildcard(_) => {}
                    }
                }
                Ok(())
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(op) = operand {
                    self.check_expr(op)?;
                }
                for c in conditions {
                    self.check_expr(c)?;
                }
                for r in results {
                    self.check_expr(r)?;
                }
                if let Some(e) = else_result {
                    self.check_expr(e)?;
                }
                Ok(())
            }
            // Literals and anything without identifiers.
            _ => Ok(()),
        }
    }

    /// Unqualified column: must exist in one of the referenced tables or be
    /// a select-list alias (usable in GROUP BY / ORDER BY).
    fn check_column(&self, name: &str) -> Result<(), RejectReason> {
        let lowered = name.to_lowercase();
        if self.aliases.contains(&lowered) {
            return Ok(());
        }
        let known = self.tables.iter().any(|t| {
            t.opaque
                || t.names
                    .iter()
                    .any(|n| self.schema.has_column(n, &lowered))
        });
        if known {
            Ok(())
        } else {
            Err(RejectReason::UnknownIdentifier(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaDescription, TableSchema};

    fn sales_schema() -> SchemaDescription {
        SchemaDescription {
            version: "v1".into(),
            tables: vec![
                TableSchema {
                    name: "sales".into(),
                    columns: vec!["date".into(), "amount".into(), "region".into()],
                },
                TableSchema {
                    name: "customers".into(),
                    columns: vec!["id".into(), "name".into()],
                },
            ],
        }
    }

    #[test]
    fn plain_select_passes() {
        let schema = sales_schema();
        assert!(validate("SELECT date, amount FROM sales", &schema).is_ok());
        assert!(validate("SELECT * FROM sales;", &schema).is_ok());
    }

    #[test]
    fn aggregates_aliases_and_clauses_pass() {
        let schema = sales_schema();
        let sql = "SELECT region, SUM(amount) AS total FROM sales \
                   WHERE date > '2024-01-01' GROUP BY region \
                   HAVING SUM(amount) > 100 ORDER BY total DESC LIMIT 10";
        assert_eq!(validate(sql, &schema), Ok(()));
    }

    #[test]
    fn joins_resolve_through_aliases() {
        let schema = sales_schema();
        let sql = "SELECT s.region, c.name FROM sales s \
                   JOIN customers c ON s.region = c.name";
        assert_eq!(validate(sql, &schema), Ok(()));
    }

    #[test]
    fn mutation_statement_is_rejected() {
        let schema = sales_schema();
        assert_eq!(
            validate("DROP TABLE sales", &schema),
            Err(RejectReason::NotSelect)
        );
        assert_eq!(
            validate("UPDATE sales SET amount = 0", &schema),
            Err(RejectReason::NotSelect)
        );
    }

    #[test]
    fn select_into_is_rejected_as_a_write() {
        let schema = sales_schema();
        assert_eq!(
            validate("SELECT date, amount INTO evil_copy FROM sales", &schema),
            Err(RejectReason::NotReadOnly("SELECT INTO".into()))
        );
    }

    #[test]
    fn locking_select_is_rejected_as_a_write() {
        let schema = sales_schema();
        // FOR UPDATE already dies on the keyword denylist.
        assert_eq!(
            validate("SELECT amount FROM sales FOR UPDATE", &schema),
            Err(RejectReason::ForbiddenKeyword("UPDATE".into()))
        );
        assert_eq!(
            validate("SELECT amount FROM sales FOR SHARE", &schema),
            Err(RejectReason::NotReadOnly("locking clause".into()))
        );
    }

    #[test]
    fn stacked_statements_are_rejected() {
        let schema = sales_schema();
        assert_eq!(
            validate("SELECT * FROM sales; DELETE FROM sales", &schema),
            Err(RejectReason::MultipleStatements)
        );
    }

    #[test]
    fn forbidden_keyword_inside_select_is_rejected() {
        let schema = sales_schema();
        let outcome = validate("SELECT amount FROM sales WHERE region = 'x' OR DELETE", &schema);
        assert_eq!(
            outcome,
            Err(RejectReason::ForbiddenKeyword("DELETE".into()))
        );
    }

    #[test]
    fn keyword_as_substring_of_identifier_is_allowed() {
        // "created" contains CREATE but is not the keyword on a token boundary.
        let schema = SchemaDescription {
            version: "v1".into(),
            tables: vec![TableSchema {
                name: "events".into(),
                columns: vec!["created".into()],
            }],
        };
        assert_eq!(validate("SELECT created FROM events", &schema), Ok(()));
    }

    #[test]
    fn unknown_table_and_column_are_rejected() {
        let schema = sales_schema();
        assert_eq!(
            validate("SELECT x FROM missing", &schema),
            Err(RejectReason::UnknownIdentifier("missing".into()))
        );
        assert_eq!(
            validate("SELECT profit FROM sales", &schema),
            Err(RejectReason::UnknownIdentifier("profit".into()))
        );
    }

    #[test]
    fn garbage_is_unparseable() {
        let schema = sales_schema();
        assert!(matches!(
            validate("SELECT FROM WHERE", &schema),
            Err(RejectReason::Unparseable(_))
        ));
    }
}
