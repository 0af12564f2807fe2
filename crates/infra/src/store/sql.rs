//! Rendering of query criteria into parameterized Postgres SQL.

use sqlx::{Postgres, QueryBuilder};

use invoicer_invoicing::{Invoice, InvoicePredicate, InvoiceQuery, Item, ItemPredicate, ItemQuery, Table};

use crate::lock::Relation;

pub(crate) fn select_invoices(table: &Relation, query: &InvoiceQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = select_from(table, Invoice::COLUMNS);
    for predicate in query.predicates() {
        qb.push(" AND (");
        push_invoice_predicate(&mut qb, predicate);
        qb.push(")");
    }
    qb.push(" ORDER BY date_due ASC, id ASC");
    qb
}

pub(crate) fn select_items(table: &Relation, query: &ItemQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = select_from(table, Item::COLUMNS);
    for predicate in query.predicates() {
        qb.push(" AND (");
        push_item_predicate(&mut qb, predicate);
        qb.push(")");
    }
    qb.push(" ORDER BY id ASC");
    qb
}

fn select_from(table: &Relation, columns: &[&str]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(columns.join(", "));
    qb.push(" FROM ");
    qb.push(table.quoted());
    qb.push(" WHERE TRUE");
    qb
}

fn push_invoice_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &InvoicePredicate) {
    match predicate {
        // date column vs. end-of-day instant compares on the calendar date
        InvoicePredicate::DueBefore(cutoff) => {
            qb.push("date_due < ");
            qb.push_bind(cutoff.date());
        }
        InvoicePredicate::DueAfter(cutoff) => {
            qb.push("date_due > ");
            qb.push_bind(cutoff.date());
        }
        InvoicePredicate::StatusIs(status) => {
            qb.push("status = ");
            qb.push_bind(status.as_str());
        }
        InvoicePredicate::StatusIn(statuses) => {
            if statuses.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("status IN (");
            let mut list = qb.separated(", ");
            for status in statuses {
                list.push_bind(status.as_str());
            }
            list.push_unseparated(")");
        }
        InvoicePredicate::Not(inner) => {
            qb.push("NOT (");
            push_invoice_predicate(qb, inner);
            qb.push(")");
        }
        InvoicePredicate::AnyOf(preds) => {
            if preds.is_empty() {
                qb.push("FALSE");
                return;
            }
            for (idx, p) in preds.iter().enumerate() {
                if idx > 0 {
                    qb.push(" OR ");
                }
                qb.push("(");
                push_invoice_predicate(qb, p);
                qb.push(")");
            }
        }
    }
}

fn push_item_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &ItemPredicate) {
    match predicate {
        ItemPredicate::TagEq(tag) => {
            qb.push("tag = ");
            qb.push_bind(tag.clone());
        }
    }
}
