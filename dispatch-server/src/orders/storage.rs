//! redb-backed order repository
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `main_orders` | `order_id` | `MainOrder` | Aggregates (with sub-orders) |
//! | `sub_orders` | `sub_order_id` | `order_id` | Sub-order lookup |
//! | `eligible` | `(publish_time, sub_order_id)` | `order_id` | Claimable listing |
//! | `claim_leases` | `(lease_expires_at, sub_order_id)` | `order_id` | Lease sweep |
//! | `pending_payouts` | `sub_order_id` | `order_id` | Payout retry queue |
//! | `pending_refunds` | `order_id` | `()` | Refund retry queue |
//! | `publisher_orders` | `(user_id, order_id)` | `publish_time` | Publisher listing |
//! | `commenter_sub_orders` | `(commenter_id, sub_order_id)` | `order_id` | Commenter listing |
//! | `order_sequence` | `"order_count"` | `u64` | Order numbers |
//!
//! Every index except `sub_orders` and `publisher_orders` is derived from the
//! aggregate and re-synced in the same transaction that writes it.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use shared::models::{MainOrder, MainOrderStatus, SubOrder, SubOrderStatus};
use shared::request::EligibleFilter;
use shared::response::EligibleTask;
use shared::util::{date_stamp, now_millis};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{
    MainOrderUpdate, NewMainOrder, OrderError, OrderRepository, OrderResult, SubOrderUpdate,
};
use crate::db::{StorageError, StorageResult, decode, encode, open_database};

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("main_orders");

const SUB_ORDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("sub_orders");

const ELIGIBLE_TABLE: TableDefinition<(u64, &str), &str> = TableDefinition::new("eligible");

const CLAIM_LEASES_TABLE: TableDefinition<(u64, &str), &str> =
    TableDefinition::new("claim_leases");

const PENDING_PAYOUTS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("pending_payouts");

const PENDING_REFUNDS_TABLE: TableDefinition<&str, ()> = TableDefinition::new("pending_refunds");

const PUBLISHER_ORDERS_TABLE: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("publisher_orders");

const COMMENTER_SUB_ORDERS_TABLE: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("commenter_sub_orders");

const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("order_sequence");

const ORDER_COUNT_KEY: &str = "order_count";

/// Which derived index entries a sub-order currently needs
#[derive(Debug, Default, PartialEq, Eq)]
struct IndexKeys {
    eligible: bool,
    lease: Option<u64>,
    payout_pending: bool,
    commenter: Option<String>,
}

impl IndexKeys {
    fn of(sub: &SubOrder) -> Self {
        Self {
            eligible: sub.is_eligible(),
            lease: match sub.status {
                SubOrderStatus::SubProgress => sub.lease_expires_at.map(to_key),
                _ => None,
            },
            payout_pending: sub.status == SubOrderStatus::SubCompleted
                && sub.payout_transaction_id.is_none(),
            commenter: sub.commenter_id.clone(),
        }
    }
}

fn to_key(millis: i64) -> u64 {
    millis.max(0) as u64
}

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
    /// Open or create the orders database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::init(open_database(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(crate::db::open_in_memory()?)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(SUB_ORDERS_TABLE)?;
            let _ = write_txn.open_table(ELIGIBLE_TABLE)?;
            let _ = write_txn.open_table(CLAIM_LEASES_TABLE)?;
            let _ = write_txn.open_table(PENDING_PAYOUTS_TABLE)?;
            let _ = write_txn.open_table(PENDING_REFUNDS_TABLE)?;
            let _ = write_txn.open_table(PUBLISHER_ORDERS_TABLE)?;
            let _ = write_txn.open_table(COMMENTER_SUB_ORDERS_TABLE)?;

            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(ORDER_COUNT_KEY)?.is_none() {
                seq_table.insert(ORDER_COUNT_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Increment and return the order counter (within transaction)
    fn next_order_count(txn: &WriteTransaction) -> OrderResult<u64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table
            .get(ORDER_COUNT_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(ORDER_COUNT_KEY, next)?;
        Ok(next)
    }

    fn load_in(txn: &WriteTransaction, order_id: &str) -> OrderResult<MainOrder> {
        let table = txn.open_table(ORDERS_TABLE)?;
        let guard = table
            .get(order_id)?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;
        Ok(decode(guard.value())?)
    }

    fn owner_of_in(txn: &WriteTransaction, sub_order_id: &str) -> OrderResult<String> {
        let table = txn.open_table(SUB_ORDERS_TABLE)?;
        let guard = table
            .get(sub_order_id)?
            .ok_or_else(|| OrderError::SubOrderNotFound(sub_order_id.to_string()))?;
        Ok(guard.value().to_string())
    }

    /// Write the aggregate and bring every derived index in line with it
    fn write_in(
        txn: &WriteTransaction,
        prev: Option<&MainOrder>,
        order: &MainOrder,
    ) -> OrderResult<()> {
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            table.insert(order.id.as_str(), encode(order)?.as_slice())?;
        }

        let publish_key = to_key(order.publish_time);
        let mut eligible = txn.open_table(ELIGIBLE_TABLE)?;
        let mut leases = txn.open_table(CLAIM_LEASES_TABLE)?;
        let mut payouts = txn.open_table(PENDING_PAYOUTS_TABLE)?;
        let mut commenters = txn.open_table(COMMENTER_SUB_ORDERS_TABLE)?;

        for (i, sub) in order.sub_orders.iter().enumerate() {
            let was = prev
                .and_then(|p| p.sub_orders.get(i))
                .map(IndexKeys::of)
                .unwrap_or_default();
            let now = IndexKeys::of(sub);
            if was == now {
                continue;
            }
            let sub_id = sub.id.as_str();

            if was.eligible {
                eligible.remove((publish_key, sub_id))?;
            }
            if let Some(expiry) = was.lease {
                leases.remove((expiry, sub_id))?;
            }
            if was.payout_pending {
                payouts.remove(sub_id)?;
            }
            if let Some(commenter) = was.commenter.as_deref() {
                commenters.remove((commenter, sub_id))?;
            }

            if now.eligible {
                eligible.insert((publish_key, sub_id), order.id.as_str())?;
            }
            if let Some(expiry) = now.lease {
                leases.insert((expiry, sub_id), order.id.as_str())?;
            }
            if now.payout_pending {
                payouts.insert(sub_id, order.id.as_str())?;
            }
            if let Some(commenter) = now.commenter.as_deref() {
                commenters.insert((commenter, sub_id), order.id.as_str())?;
            }
        }

        let mut refunds = txn.open_table(PENDING_REFUNDS_TABLE)?;
        if order.has_unsettled_refund() {
            refunds.insert(order.id.as_str(), ())?;
        } else {
            refunds.remove(order.id.as_str())?;
        }
        Ok(())
    }

    /// Guard rails every write passes, whoever produced the new state
    fn check_transition(prev: &MainOrder, next: &MainOrder) -> OrderResult<()> {
        if prev.sub_orders.len() != next.sub_orders.len() {
            return Err(OrderError::Validation(format!(
                "order {} cannot change its number of sub-orders",
                prev.id
            )));
        }
        for (before, after) in prev.sub_orders.iter().zip(&next.sub_orders) {
            if before.id != after.id {
                return Err(OrderError::Validation(format!(
                    "sub-order {} cannot be renamed",
                    before.id
                )));
            }
            if before.status.is_terminal() && after.status != before.status {
                return Err(OrderError::BackwardTransition {
                    id: before.id.clone(),
                    from: before.status,
                    to: after.status,
                });
            }
            if let (Some(old), Some(new)) = (&before.commenter_id, &after.commenter_id)
                && old != new
            {
                return Err(OrderError::AlreadyClaimed(before.id.clone()));
            }
            if after.status.is_held() != after.commenter_id.is_some() {
                return Err(OrderError::invalid_state(after.id.clone(), after.status));
            }
        }
        if prev.status == MainOrderStatus::MainCompleted
            && next.status != MainOrderStatus::MainCompleted
        {
            return Err(OrderError::invalid_state(prev.id.clone(), prev.status));
        }
        Ok(())
    }

    /// Commit `txn` if `result` is Ok, abort it otherwise
    fn finish<T>(txn: WriteTransaction, result: OrderResult<T>) -> OrderResult<T> {
        match result {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn apply_in(
        txn: &WriteTransaction,
        order_id: &str,
        update: &mut dyn FnMut(&mut MainOrder) -> OrderResult<()>,
    ) -> OrderResult<MainOrder> {
        let prev = Self::load_in(txn, order_id)?;
        let mut order = prev.clone();
        update(&mut order)?;
        order.refresh(now_millis());
        Self::check_transition(&prev, &order)?;
        Self::write_in(txn, Some(&prev), &order)?;
        Ok(order)
    }

    fn scan_eligible<T>(
        &self,
        filter: &EligibleFilter,
        mut map: impl FnMut(&MainOrder, &SubOrder) -> T,
    ) -> OrderResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ELIGIBLE_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut parents: HashMap<String, MainOrder> = HashMap::new();
        let mut out = Vec::new();
        let limit = filter.limit.unwrap_or(usize::MAX);

        for result in index.iter()? {
            if out.len() >= limit {
                break;
            }
            let (key, value) = result?;
            let (_, sub_id) = key.value();
            let order_id = value.value();

            if let Some(wanted) = filter.order_id.as_deref()
                && wanted != order_id
            {
                continue;
            }
            if !parents.contains_key(order_id) {
                let guard = orders.get(order_id)?.ok_or_else(|| {
                    StorageError::DanglingIndex(format!("order {}", order_id))
                })?;
                parents.insert(order_id.to_string(), decode(guard.value())?);
            }
            let Some(parent) = parents.get(order_id) else {
                continue;
            };
            if !parent.is_open() {
                continue;
            }
            if let Some(min) = filter.min_price
                && parent.unit_price < min
            {
                continue;
            }
            if filter.exclude_publisher.as_deref() == Some(parent.user_id.as_str()) {
                continue;
            }
            if let Some(sub) = parent.sub_order(sub_id)
                && sub.is_eligible()
            {
                out.push(map(parent, sub));
            }
        }
        Ok(out)
    }

    fn load_orders<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> OrderResult<Vec<MainOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for id in ids {
            let guard = table
                .get(id)?
                .ok_or_else(|| StorageError::DanglingIndex(format!("order {}", id)))?;
            orders.push(decode(guard.value())?);
        }
        Ok(orders)
    }
}

impl OrderRepository for OrderStorage {
    fn create_main_order(&self, new_order: NewMainOrder) -> OrderResult<MainOrder> {
        if new_order.quantity == 0 {
            return Err(OrderError::Validation("quantity must be at least 1".into()));
        }

        let txn = self.db.begin_write()?;
        let result = (|| -> OrderResult<MainOrder> {
            {
                let table = txn.open_table(ORDERS_TABLE)?;
                if table.get(new_order.id.as_str())?.is_some() {
                    return Err(OrderError::AlreadyExists(new_order.id.clone()));
                }
            }

            let count = Self::next_order_count(&txn)?;
            let now = now_millis();
            let order_number = format!(
                "{}{}{}",
                new_order.variant.number_prefix(),
                date_stamp(new_order.publish_time),
                10000 + count
            );

            let mut order = MainOrder {
                id: new_order.id.clone(),
                order_number,
                user_id: new_order.user_id.clone(),
                variant: new_order.variant,
                task_title: new_order.task_title.clone(),
                unit_price: new_order.unit_price,
                quantity: new_order.quantity,
                completed_quantity: 0,
                total_cost: new_order.total_cost,
                status: MainOrderStatus::MainProgress,
                task_requirements: new_order.task_requirements.clone(),
                video_url: new_order.video_url.clone(),
                mention: new_order.mention.clone(),
                escrow_transaction_id: new_order.escrow_transaction_id.clone(),
                refunds: Vec::new(),
                publish_time: new_order.publish_time,
                deadline: new_order.deadline,
                updated_at: now,
                sub_orders: Vec::with_capacity(new_order.quantity as usize),
            };
            for index in 1..=new_order.quantity {
                let mut sub = SubOrder::new(&order, index, now);
                sub.account_details = new_order.account_details.clone();
                order.sub_orders.push(sub);
            }
            order.refresh(now);

            {
                let mut subs = txn.open_table(SUB_ORDERS_TABLE)?;
                for sub in &order.sub_orders {
                    subs.insert(sub.id.as_str(), order.id.as_str())?;
                }
                let mut publisher = txn.open_table(PUBLISHER_ORDERS_TABLE)?;
                publisher.insert(
                    (order.user_id.as_str(), order.id.as_str()),
                    to_key(order.publish_time),
                )?;
            }
            Self::write_in(&txn, None, &order)?;
            Ok(order)
        })();
        let order = Self::finish(txn, result)?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            user_id = %order.user_id,
            quantity = order.quantity,
            "Main order created"
        );
        Ok(order)
    }

    fn get_main_order(&self, order_id: &str) -> OrderResult<MainOrder> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let guard = table
            .get(order_id)?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;
        Ok(decode(guard.value())?)
    }

    fn get_sub_order(&self, sub_order_id: &str) -> OrderResult<SubOrder> {
        let read_txn = self.db.begin_read()?;
        let subs = read_txn.open_table(SUB_ORDERS_TABLE)?;
        let order_id = subs
            .get(sub_order_id)?
            .ok_or_else(|| OrderError::SubOrderNotFound(sub_order_id.to_string()))?
            .value()
            .to_string();
        let orders = read_txn.open_table(ORDERS_TABLE)?;
        let guard = orders
            .get(order_id.as_str())?
            .ok_or_else(|| StorageError::DanglingIndex(format!("order {}", order_id)))?;
        let order: MainOrder = decode(guard.value())?;
        order
            .sub_orders
            .into_iter()
            .find(|s| s.id == sub_order_id)
            .ok_or_else(|| OrderError::SubOrderNotFound(sub_order_id.to_string()))
    }

    fn find_eligible_sub_orders(&self, filter: &EligibleFilter) -> OrderResult<Vec<SubOrder>> {
        self.scan_eligible(filter, |_, sub| sub.clone())
    }

    fn eligible_tasks(&self, filter: &EligibleFilter) -> OrderResult<Vec<EligibleTask>> {
        self.scan_eligible(filter, EligibleTask::from_parts)
    }

    fn save(&self, order: &MainOrder) -> OrderResult<()> {
        let txn = self.db.begin_write()?;
        let result = (|| -> OrderResult<()> {
            let prev = Self::load_in(&txn, &order.id)?;
            let mut next = order.clone();
            next.refresh(now_millis());
            Self::check_transition(&prev, &next)?;
            Self::write_in(&txn, Some(&prev), &next)
        })();
        Self::finish(txn, result)
    }

    fn update_sub_order(
        &self,
        sub_order_id: &str,
        update: &mut SubOrderUpdate<'_>,
    ) -> OrderResult<MainOrder> {
        let txn = self.db.begin_write()?;
        let result = (|| -> OrderResult<MainOrder> {
            let order_id = Self::owner_of_in(&txn, sub_order_id)?;
            Self::apply_in(&txn, &order_id, &mut |order: &mut MainOrder| {
                let index = order
                    .sub_order_index(sub_order_id)
                    .ok_or_else(|| OrderError::SubOrderNotFound(sub_order_id.to_string()))?;
                update(order, index)
            })
        })();
        Self::finish(txn, result)
    }

    fn update_main_order(
        &self,
        order_id: &str,
        update: &mut MainOrderUpdate<'_>,
    ) -> OrderResult<MainOrder> {
        let txn = self.db.begin_write()?;
        let result = Self::apply_in(&txn, order_id, update);
        Self::finish(txn, result)
    }

    fn orders_for_publisher(&self, user_id: &str) -> OrderResult<Vec<MainOrder>> {
        let ids = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(PUBLISHER_ORDERS_TABLE)?;
            let mut ids = Vec::new();
            for result in table.range((user_id, "")..)? {
                let (key, _) = result?;
                let (owner, order_id) = key.value();
                if owner != user_id {
                    break;
                }
                ids.push(order_id.to_string());
            }
            ids
        };
        let mut orders = self.load_orders(ids.iter().map(String::as_str))?;
        orders.sort_by(|a, b| b.publish_time.cmp(&a.publish_time).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    fn sub_orders_for_commenter(&self, commenter_id: &str) -> OrderResult<Vec<SubOrder>> {
        let entries = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(COMMENTER_SUB_ORDERS_TABLE)?;
            let mut entries = Vec::new();
            for result in table.range((commenter_id, "")..)? {
                let (key, value) = result?;
                let (holder, sub_id) = key.value();
                if holder != commenter_id {
                    break;
                }
                entries.push((sub_id.to_string(), value.value().to_string()));
            }
            entries
        };

        let mut order_ids: Vec<&str> = entries.iter().map(|(_, o)| o.as_str()).collect();
        order_ids.sort_unstable();
        order_ids.dedup();
        let orders: HashMap<String, MainOrder> = self
            .load_orders(order_ids)?
            .into_iter()
            .map(|o| (o.id.clone(), o))
            .collect();

        let mut subs: Vec<SubOrder> = entries
            .iter()
            .filter_map(|(sub_id, order_id)| orders.get(order_id)?.sub_order(sub_id).cloned())
            .filter(|s| s.is_held_by(commenter_id))
            .collect();
        subs.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at).then(a.id.cmp(&b.id)));
        Ok(subs)
    }

    fn expired_claims(&self, now: i64) -> OrderResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CLAIM_LEASES_TABLE)?;
        let cutoff = to_key(now);
        let mut expired = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            let (expiry, sub_id) = key.value();
            if expiry > cutoff {
                break;
            }
            expired.push(sub_id.to_string());
        }
        Ok(expired)
    }

    fn pending_payouts(&self) -> OrderResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_PAYOUTS_TABLE)?;
        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    fn pending_refunds(&self) -> OrderResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_REFUNDS_TABLE)?;
        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::{OrderVariant, Refund};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn create_test_storage() -> OrderStorage {
        OrderStorage::open_in_memory().unwrap()
    }

    fn new_order(id: &str, user_id: &str, quantity: u32, publish_time: i64) -> NewMainOrder {
        NewMainOrder {
            id: id.to_string(),
            user_id: user_id.to_string(),
            variant: OrderVariant::CommentCampaign,
            task_title: "Comment on my video".to_string(),
            unit_price: Decimal::from(5),
            quantity,
            total_cost: Decimal::from(5 * quantity),
            task_requirements: "Mention the product".to_string(),
            video_url: None,
            mention: None,
            account_details: None,
            escrow_transaction_id: Some(format!("escrow-{}", id)),
            publish_time,
            deadline: publish_time + 7 * shared::util::MILLIS_PER_DAY,
        }
    }

    fn claim(storage: &OrderStorage, sub_id: &str, commenter: &str, expires: i64) -> OrderResult<MainOrder> {
        storage.update_sub_order(sub_id, &mut |order, i| {
            let sub = &mut order.sub_orders[i];
            if !sub.is_eligible() {
                return Err(OrderError::AlreadyClaimed(sub.id.clone()));
            }
            sub.status = SubOrderStatus::SubProgress;
            sub.commenter_id = Some(commenter.to_string());
            sub.claimed_at = Some(expires - 1000);
            sub.lease_expires_at = Some(expires);
            Ok(())
        })
    }

    #[test]
    fn test_create_assigns_numbers_and_sub_orders() {
        let storage = create_test_storage();
        // 2026-01-02
        let first = storage
            .create_main_order(new_order("o1", "pub", 3, 1_767_323_045_000))
            .unwrap();
        let second = storage
            .create_main_order(new_order("o2", "pub", 1, 1_767_323_045_000))
            .unwrap();

        assert_eq!(first.order_number, "DY2026010210001");
        assert_eq!(second.order_number, "DY2026010210002");
        assert_eq!(first.sub_orders.len(), 3);
        assert_eq!(first.sub_orders[2].id, "o1-003");
        assert_eq!(first.sub_orders[2].order_number, "DY2026010210001-003");
        assert_eq!(first.completed_quantity, 0);
        assert_eq!(first.status, MainOrderStatus::MainProgress);

        let loaded = storage.get_main_order("o1").unwrap();
        assert_eq!(loaded, first);
        assert_eq!(storage.get_sub_order("o1-002").unwrap().parent_id, "o1");
    }

    #[test]
    fn test_create_rejects_duplicate_and_empty() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 1, 0)).unwrap();

        let dup = storage.create_main_order(new_order("o1", "pub", 1, 0));
        assert!(matches!(dup, Err(OrderError::AlreadyExists(_))));

        let empty = storage.create_main_order(new_order("o2", "pub", 0, 0));
        assert!(matches!(empty, Err(OrderError::Validation(_))));
        assert!(matches!(
            storage.get_main_order("o2"),
            Err(OrderError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_account_rental_copies_details() {
        let storage = create_test_storage();
        let mut order = new_order("r1", "pub", 1, 0);
        order.variant = OrderVariant::AccountRental;
        order.account_details = Some(serde_json::json!({"platform": "douyin"}));
        let created = storage.create_main_order(order).unwrap();

        assert!(created.order_number.starts_with("AC"));
        assert_eq!(
            created.sub_orders[0].account_details,
            Some(serde_json::json!({"platform": "douyin"}))
        );
    }

    #[test]
    fn test_missing_lookups() {
        let storage = create_test_storage();
        assert!(matches!(
            storage.get_sub_order("nope"),
            Err(OrderError::SubOrderNotFound(_))
        ));
        let mut noop = |_: &mut MainOrder, _: usize| -> OrderResult<()> { Ok(()) };
        assert!(matches!(
            storage.update_sub_order("nope", &mut noop),
            Err(OrderError::SubOrderNotFound(_))
        ));
    }

    #[test]
    fn test_eligible_listing_follows_claims() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("late", "pub", 1, 2_000)).unwrap();
        storage.create_main_order(new_order("early", "pub", 2, 1_000)).unwrap();

        let ids: Vec<String> = storage
            .find_eligible_sub_orders(&EligibleFilter::default())
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["early-001", "early-002", "late-001"]);

        claim(&storage, "early-001", "alice", 10_000).unwrap();
        let tasks = storage.eligible_tasks(&EligibleFilter::default()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "early-002");
        assert_eq!(tasks[0].remaining, "1/2");
        assert_eq!(tasks[0].progress, 50);

        let filtered = storage
            .find_eligible_sub_orders(&EligibleFilter {
                order_id: Some("late".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let limited = storage
            .find_eligible_sub_orders(&EligibleFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);

        let excluded = storage
            .find_eligible_sub_orders(&EligibleFilter {
                exclude_publisher: Some("pub".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 1, 0)).unwrap();
        claim(&storage, "o1-001", "alice", 10_000).unwrap();

        let second = claim(&storage, "o1-001", "bob", 20_000);
        assert!(matches!(second, Err(OrderError::AlreadyClaimed(_))));

        let sub = storage.get_sub_order("o1-001").unwrap();
        assert_eq!(sub.commenter_id.as_deref(), Some("alice"));
        assert_eq!(sub.lease_expires_at, Some(10_000));
        assert_eq!(storage.get_main_order("o1").unwrap().completed_quantity, 1);
    }

    #[test]
    fn test_commenter_cannot_be_reassigned() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 1, 0)).unwrap();
        claim(&storage, "o1-001", "alice", 10_000).unwrap();

        let result = storage.update_sub_order("o1-001", &mut |order, i| {
            order.sub_orders[i].commenter_id = Some("bob".into());
            Ok(())
        });
        assert!(matches!(result, Err(OrderError::AlreadyClaimed(_))));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 2, 0)).unwrap();
        storage
            .update_main_order("o1", &mut |order| {
                order.sub_orders[1].status = SubOrderStatus::SubCancelled;
                Ok(())
            })
            .unwrap();

        let mut order = storage.get_main_order("o1").unwrap();
        order.sub_orders[1].status = SubOrderStatus::WaitingCollect;
        assert!(matches!(
            storage.save(&order),
            Err(OrderError::BackwardTransition { .. })
        ));

        let mut order = storage.get_main_order("o1").unwrap();
        order.sub_orders.pop();
        assert!(matches!(storage.save(&order), Err(OrderError::Validation(_))));
    }

    #[test]
    fn test_main_order_completes_when_all_terminal() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 2, 0)).unwrap();
        claim(&storage, "o1-001", "alice", 10_000).unwrap();

        let order = storage
            .update_main_order("o1", &mut |order| {
                let sub = &mut order.sub_orders[0];
                sub.status = SubOrderStatus::SubCompleted;
                order.sub_orders[1].status = SubOrderStatus::SubCancelled;
                Ok(())
            })
            .unwrap();
        assert_eq!(order.status, MainOrderStatus::MainCompleted);
        assert_eq!(order.completed_quantity, 1);
        assert!(
            storage
                .find_eligible_sub_orders(&EligibleFilter::default())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_lease_index_and_expiry() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 3, 0)).unwrap();
        claim(&storage, "o1-001", "alice", 5_000).unwrap();
        claim(&storage, "o1-002", "bob", 9_000).unwrap();

        assert_eq!(storage.expired_claims(4_999).unwrap(), Vec::<String>::new());
        assert_eq!(storage.expired_claims(5_000).unwrap(), vec!["o1-001"]);
        assert_eq!(
            storage.expired_claims(10_000).unwrap(),
            vec!["o1-001", "o1-002"]
        );

        // Submission ends the lease
        storage
            .update_sub_order("o1-002", &mut |order, i| {
                let sub = &mut order.sub_orders[i];
                sub.status = SubOrderStatus::SubPendingReview;
                sub.lease_expires_at = None;
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.expired_claims(10_000).unwrap(), vec!["o1-001"]);

        storage
            .update_sub_order("o1-001", &mut |order, i| {
                order.sub_orders[i].clear_claim(6_000);
                Ok(())
            })
            .unwrap();
        assert!(storage.expired_claims(10_000).unwrap().is_empty());
        assert_eq!(
            storage
                .find_eligible_sub_orders(&EligibleFilter::default())
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_pending_payout_and_refund_queues() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("o1", "pub", 2, 0)).unwrap();
        claim(&storage, "o1-001", "alice", 5_000).unwrap();
        storage
            .update_sub_order("o1-001", &mut |order, i| {
                order.sub_orders[i].status = SubOrderStatus::SubCompleted;
                order.sub_orders[i].lease_expires_at = None;
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.pending_payouts().unwrap(), vec!["o1-001"]);

        storage
            .update_sub_order("o1-001", &mut |order, i| {
                order.sub_orders[i].payout_transaction_id = Some("payout-o1-001".into());
                Ok(())
            })
            .unwrap();
        assert!(storage.pending_payouts().unwrap().is_empty());

        storage
            .update_main_order("o1", &mut |order| {
                order.sub_orders[1].status = SubOrderStatus::SubCancelled;
                order.refunds.push(Refund {
                    transaction_id: "reversal-o1-1".into(),
                    units: 1,
                    amount: Decimal::from(5),
                    created_at: 0,
                    settled: false,
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.pending_refunds().unwrap(), vec!["o1"]);

        storage
            .update_main_order("o1", &mut |order| {
                order.refunds[0].settled = true;
                Ok(())
            })
            .unwrap();
        assert!(storage.pending_refunds().unwrap().is_empty());
    }

    #[test]
    fn test_listings_by_publisher_and_commenter() {
        let storage = create_test_storage();
        storage.create_main_order(new_order("a", "pub1", 2, 1_000)).unwrap();
        storage.create_main_order(new_order("b", "pub1", 1, 2_000)).unwrap();
        storage.create_main_order(new_order("c", "pub2", 1, 3_000)).unwrap();

        let ids: Vec<String> = storage
            .orders_for_publisher("pub1")
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(storage.orders_for_publisher("pub").unwrap().is_empty());

        claim(&storage, "a-001", "alice", 5_000).unwrap();
        claim(&storage, "c-001", "alice", 6_000).unwrap();
        claim(&storage, "a-002", "bob", 7_000).unwrap();

        let held: Vec<String> = storage
            .sub_orders_for_commenter("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(held, vec!["c-001", "a-001"]);

        storage
            .update_sub_order("a-001", &mut |order, i| {
                order.sub_orders[i].clear_claim(8_000);
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.sub_orders_for_commenter("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let storage = Arc::new(create_test_storage());
        storage.create_main_order(new_order("o1", "pub", 1, 0)).unwrap();
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let storage = storage.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if claim(&storage, "o1-001", &format!("c{}", n), 10_000).is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        let order = storage.get_main_order("o1").unwrap();
        assert_eq!(order.completed_quantity, 1);
        assert!(order.sub_orders[0].commenter_id.is_some());
    }
}
