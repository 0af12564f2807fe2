//! Lazy, composable filters over invoice and line-item records.
//!
//! A query is a list of predicates joined by AND. Building a query never
//! touches the store: the criteria (including any "today" boundary) are fixed
//! when the filter method is called, and rows are only matched when the query
//! is evaluated in memory ([`InvoiceQuery::apply`]) or rendered by a store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

use invoicer_core::{Clock, SystemClock, ValueObject};

use crate::schema::{Invoice, Item};
use crate::status::InvoiceStatus;

/// End-of-day instant of the current date (`23:59:59.999999`).
///
/// `date_due` is a calendar-date column, so it is compared against the
/// cutoff's date. An invoice due today is therefore neither before nor after
/// the cutoff: it is in neither `overdue()` nor `not_overdue()` until the
/// next calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DueCutoff(NaiveDateTime);

impl DueCutoff {
    pub fn from_now(now: DateTime<Utc>) -> Self {
        // NaiveTime arithmetic wraps: midnight - 1µs is 23:59:59.999999.
        let end_of_day = NaiveTime::default() - TimeDelta::microseconds(1);
        Self(now.date_naive().and_time(end_of_day))
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }
}

impl ValueObject for DueCutoff {}

/// A single condition on an invoice row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoicePredicate {
    /// `date_due < cutoff`
    DueBefore(DueCutoff),
    /// `date_due > cutoff`
    DueAfter(DueCutoff),
    /// `status = s`
    StatusIs(InvoiceStatus),
    /// `status IN (...)`; an empty set matches nothing.
    StatusIn(Vec<InvoiceStatus>),
    Not(Box<InvoicePredicate>),
    /// Disjunction; an empty list matches nothing.
    AnyOf(Vec<InvoicePredicate>),
}

impl InvoicePredicate {
    pub fn status_not_in(statuses: &[InvoiceStatus]) -> Self {
        Self::Not(Box::new(Self::StatusIn(statuses.to_vec())))
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        match self {
            Self::DueBefore(cutoff) => invoice.date_due < cutoff.date(),
            Self::DueAfter(cutoff) => invoice.date_due > cutoff.date(),
            Self::StatusIs(status) => invoice.status == *status,
            Self::StatusIn(statuses) => statuses.contains(&invoice.status),
            Self::Not(inner) => !inner.matches(invoice),
            Self::AnyOf(preds) => preds.iter().any(|p| p.matches(invoice)),
        }
    }
}

/// Filter set over invoices.
#[derive(Debug, Clone)]
pub struct InvoiceQuery {
    clock: Arc<dyn Clock>,
    predicates: Vec<InvoicePredicate>,
}

impl Default for InvoiceQuery {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InvoiceQuery {
    /// Unfiltered query; `clock` is consulted by the due-date filters.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            predicates: Vec::new(),
        }
    }

    /// Add an arbitrary predicate (AND).
    pub fn filter(mut self, predicate: InvoicePredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Past due and still collectable.
    pub fn overdue(self) -> Self {
        let cutoff = self.cutoff();
        self.filter(InvoicePredicate::DueBefore(cutoff))
            .filter(InvoicePredicate::status_not_in(&InvoiceStatus::SETTLED))
    }

    /// Due after today, or settled.
    ///
    /// Written as its own disjunction rather than `NOT overdue`, so invoices
    /// due exactly today stay out of both sets.
    pub fn not_overdue(self) -> Self {
        let cutoff = self.cutoff();
        self.filter(InvoicePredicate::AnyOf(vec![
            InvoicePredicate::DueAfter(cutoff),
            InvoicePredicate::StatusIn(InvoiceStatus::SETTLED.to_vec()),
        ]))
    }

    pub fn paid(self) -> Self {
        self.filter(InvoicePredicate::StatusIs(InvoiceStatus::Paid))
    }

    pub fn unpaid(self) -> Self {
        self.filter(InvoicePredicate::status_not_in(&InvoiceStatus::SETTLED))
    }

    pub fn valid(self) -> Self {
        self.filter(InvoicePredicate::status_not_in(&InvoiceStatus::VOID))
    }

    pub fn predicates(&self) -> &[InvoicePredicate] {
        &self.predicates
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.predicates.iter().all(|p| p.matches(invoice))
    }

    /// Lazily filter a borrowed collection.
    pub fn apply<'q, 'r, I>(&'q self, invoices: I) -> impl Iterator<Item = &'r Invoice> + 'q
    where
        'r: 'q,
        I: IntoIterator<Item = &'r Invoice>,
        I::IntoIter: 'q,
    {
        invoices.into_iter().filter(move |inv| self.matches(inv))
    }

    fn cutoff(&self) -> DueCutoff {
        DueCutoff::from_now(self.clock.now())
    }
}

/// A single condition on a line-item row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPredicate {
    /// Exact, case-sensitive `tag = value`. Untagged items never match.
    TagEq(String),
}

impl ItemPredicate {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::TagEq(tag) => item.tag.as_deref() == Some(tag.as_str()),
        }
    }
}

/// Filter set over line items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    predicates: Vec<ItemPredicate>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: ItemPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        self.filter(ItemPredicate::TagEq(tag.into()))
    }

    pub fn predicates(&self) -> &[ItemPredicate] {
        &self.predicates
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.predicates.iter().all(|p| p.matches(item))
    }

    pub fn apply<'q, 'r, I>(&'q self, items: I) -> impl Iterator<Item = &'r Item> + 'q
    where
        'r: 'q,
        I: IntoIterator<Item = &'r Item>,
        I::IntoIter: 'q,
    {
        items.into_iter().filter(move |item| self.matches(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InvoiceId, ItemId};
    use chrono::{Days, TimeZone, Timelike};
    use invoicer_core::FixedClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    fn today() -> NaiveDate {
        midday().date_naive()
    }

    fn query() -> InvoiceQuery {
        InvoiceQuery::new(Arc::new(FixedClock::new(midday())))
    }

    fn invoice(status: InvoiceStatus, date_due: NaiveDate) -> Invoice {
        Invoice {
            id: InvoiceId::new(),
            number: "2024-0001".to_string(),
            status,
            date_issue: date_due - Days::new(14),
            date_due,
            customer_vat_id: None,
            supplier_vat_id: None,
        }
    }

    fn item(tag: Option<&str>) -> Item {
        Item {
            id: ItemId::new(),
            invoice_id: InvoiceId::new(),
            title: "Consulting".to_string(),
            quantity: 1,
            unit_price: 10_000,
            tag: tag.map(str::to_string),
        }
    }

    /// Clock that moves one day forward every time it is read.
    #[derive(Debug, Default)]
    struct DriftingClock {
        reads: AtomicUsize,
    }

    impl Clock for DriftingClock {
        fn now(&self) -> DateTime<Utc> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) as u64;
            midday() + Days::new(n)
        }
    }

    #[test]
    fn cutoff_is_last_microsecond_of_today() {
        let cutoff = DueCutoff::from_now(midday());
        assert_eq!(cutoff.date(), today());
        assert_eq!(cutoff.0.hour(), 23);
        assert_eq!(cutoff.0.minute(), 59);
        assert_eq!(cutoff.0.second(), 59);
        assert_eq!(cutoff.0.nanosecond(), 999_999_000);
    }

    #[test]
    fn cutoff_on_last_representable_day_does_not_overflow() {
        let last = DateTime::<Utc>::MAX_UTC;
        let cutoff = DueCutoff::from_now(last);
        assert_eq!(cutoff.date(), last.date_naive());

        let q = InvoiceQuery::new(Arc::new(FixedClock::new(last))).overdue();
        assert!(q.matches(&invoice(InvoiceStatus::Sent, today())));
    }

    #[test]
    fn filtered_rows_outlive_the_query() {
        let rows = vec![invoice(InvoiceStatus::Paid, today()), invoice(InvoiceStatus::Sent, today())];
        let hits: Vec<&Invoice> = {
            let q = query().paid();
            q.apply(&rows).collect()
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, InvoiceStatus::Paid);
    }

    #[test]
    fn cutoff_just_before_midnight_stays_on_same_day() {
        let late = Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 59).unwrap();
        assert_eq!(DueCutoff::from_now(late).date(), today());
    }

    #[test]
    fn scenario_yesterday_today_tomorrow() {
        let yesterday = today() - Days::new(1);
        let tomorrow = today() + Days::new(1);

        let a = invoice(InvoiceStatus::Sent, yesterday);
        let b = invoice(InvoiceStatus::Paid, yesterday);
        let c = invoice(InvoiceStatus::Sent, tomorrow);
        let d = invoice(InvoiceStatus::Sent, today());

        let overdue = query().overdue();
        let not_overdue = query().not_overdue();
        let paid = query().paid();

        assert!(overdue.matches(&a));
        assert!(!not_overdue.matches(&a));

        assert!(!overdue.matches(&b));
        assert!(not_overdue.matches(&b));
        assert!(paid.matches(&b));

        assert!(not_overdue.matches(&c));
        assert!(!overdue.matches(&c));

        // Due today: in neither set until tomorrow.
        assert!(!overdue.matches(&d));
        assert!(!not_overdue.matches(&d));
    }

    #[test]
    fn due_today_becomes_overdue_the_next_day() {
        let d = invoice(InvoiceStatus::Sent, today());
        let next_morning = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 1).unwrap();
        let q = InvoiceQuery::new(Arc::new(FixedClock::new(next_morning))).overdue();
        assert!(q.matches(&d));
    }

    #[test]
    fn clock_is_read_once_per_filter_call() {
        let clock = Arc::new(DriftingClock::default());
        let q = InvoiceQuery::new(clock.clone()).overdue();
        assert_eq!(clock.reads.load(Ordering::SeqCst), 1);

        // Evaluating many rows must not consult the clock again.
        let rows: Vec<_> = (0..10)
            .map(|i| invoice(InvoiceStatus::Sent, today() - Days::new(i)))
            .collect();
        let hits = q.apply(&rows).count();
        assert_eq!(clock.reads.load(Ordering::SeqCst), 1);
        assert_eq!(hits, 9);
    }

    #[test]
    fn filters_chain_as_conjunction() {
        let yesterday = today() - Days::new(1);
        let rows = vec![
            invoice(InvoiceStatus::Sent, yesterday),
            invoice(InvoiceStatus::Returned, yesterday),
            invoice(InvoiceStatus::Draft, today() + Days::new(3)),
        ];

        let hits: Vec<_> = query().overdue().valid().apply(&rows).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, InvoiceStatus::Sent);
    }

    #[test]
    fn empty_query_matches_everything() {
        let rows = vec![
            invoice(InvoiceStatus::Canceled, today()),
            invoice(InvoiceStatus::Credited, today()),
        ];
        assert_eq!(query().apply(&rows).count(), 2);
    }

    #[test]
    fn empty_disjunction_and_empty_set_match_nothing() {
        let inv = invoice(InvoiceStatus::Sent, today());
        assert!(!InvoicePredicate::AnyOf(vec![]).matches(&inv));
        assert!(!InvoicePredicate::StatusIn(vec![]).matches(&inv));
    }

    #[test]
    fn with_tag_is_exact_and_case_sensitive() {
        let rows = vec![
            item(Some("shipping")),
            item(Some("Shipping")),
            item(Some("shipping ")),
            item(None),
        ];
        let hits: Vec<_> = ItemQuery::new().with_tag("shipping").apply(&rows).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tag.as_deref(), Some("shipping"));
    }

    #[test]
    fn untagged_items_never_match() {
        assert!(!ItemQuery::new().with_tag("").matches(&item(None)));
        assert!(ItemQuery::new().with_tag("").matches(&item(Some(""))));
    }

    fn any_status() -> impl Strategy<Value = InvoiceStatus> {
        prop::sample::select(InvoiceStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: settled invoices are never overdue, always not-overdue,
        /// never unpaid, whatever their due date.
        #[test]
        fn settled_invoices_ignore_due_date(
            settled in prop::sample::select(InvoiceStatus::SETTLED.to_vec()),
            offset in -400i64..400,
        ) {
            let inv = invoice(settled, today() + TimeDelta::days(offset));
            prop_assert!(!query().overdue().matches(&inv));
            prop_assert!(query().not_overdue().matches(&inv));
            prop_assert!(!query().unpaid().matches(&inv));
        }

        /// Property: collectable invoices due before today are overdue and
        /// those due after today are not, and never both.
        #[test]
        fn collectable_invoices_split_by_due_date(
            status in any_status(),
            offset in 1i64..400,
        ) {
            prop_assume!(!status.is_settled());

            let past = invoice(status, today() - TimeDelta::days(offset));
            prop_assert!(query().overdue().matches(&past));
            prop_assert!(!query().not_overdue().matches(&past));

            let future = invoice(status, today() + TimeDelta::days(offset));
            prop_assert!(query().not_overdue().matches(&future));
            prop_assert!(!query().overdue().matches(&future));
        }

        /// Property: paid and unpaid never overlap; valid excludes exactly
        /// returned and canceled invoices.
        #[test]
        fn status_filters_partition_as_documented(
            status in any_status(),
            offset in -30i64..30,
        ) {
            let inv = invoice(status, today() + TimeDelta::days(offset));
            prop_assert!(!(query().paid().matches(&inv) && query().unpaid().matches(&inv)));
            prop_assert_eq!(query().paid().matches(&inv), status == InvoiceStatus::Paid);
            prop_assert_eq!(query().valid().matches(&inv), !status.is_void());
        }

        /// Property: with_tag returns exactly the items carrying that tag, and
        /// two different tags never share an item.
        #[test]
        fn with_tag_selects_exact_matches(
            tags in prop::collection::vec(prop::option::of("[a-c]{1,2}"), 0..20),
            t1 in "[a-c]{1,2}",
            t2 in "[a-c]{1,2}",
        ) {
            let rows: Vec<Item> = tags.iter().map(|t| item(t.as_deref())).collect();

            let q1 = ItemQuery::new().with_tag(t1.clone());
            let expected = rows.iter().filter(|i| i.tag.as_deref() == Some(t1.as_str())).count();
            prop_assert_eq!(q1.apply(&rows).count(), expected);

            if t1 != t2 {
                let q2 = ItemQuery::new().with_tag(t2.clone());
                for row in &rows {
                    prop_assert!(!(q1.matches(row) && q2.matches(row)));
                }
            }
        }
    }
}
