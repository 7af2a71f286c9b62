//! MongoDB storage backend
//!
//! Ledger rows live in one collection keyed by `_id = account_id`; journal
//! entries live in another with a unique index on `idempotency_key`. Every
//! coordinated request runs inside one multi-document transaction, so the
//! server must be a replica set or a sharded cluster.
//!
//! Monetary fields are stored as `Int64` in units of 10^-4 so that `$inc`
//! stays exact. Request amounts in the journal are stored as strings.

use crate::core::traits::{JournalStore, LedgerStore, Transactional};
use crate::types::{
    AccountId, AccountLedger, CurrencyId, IdempotencyKey, JournalEntry, LedgerDelta,
    Precondition, StorageError, TransactionId, TransactionType,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::error::{
    ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, IndexModel};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Decimal places kept by the `Int64` encoding
const UNIT_SCALE: u32 = 4;

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Connection settings of the MongoDB backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub ledger_collection: String,
    pub journal_collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        MongoConfig {
            uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
            database: "ledger".to_string(),
            ledger_collection: "balance".to_string(),
            journal_collection: "journal".to_string(),
        }
    }
}

/// MongoDB implementation of the ledger and the journal
pub struct MongoStore {
    client: Client,
    ledgers: Collection<Document>,
    journal: Collection<Document>,
}

impl MongoStore {
    /// Connect and make sure the journal indexes exist
    pub async fn connect(config: &MongoConfig) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(&config.uri).await?;
        let database = client.database(&config.database);

        let store = MongoStore {
            ledgers: database.collection(&config.ledger_collection),
            journal: database.collection(&config.journal_collection),
            client,
        };
        store.init().await?;

        info!(
            database = %config.database,
            ledger = %config.ledger_collection,
            journal = %config.journal_collection,
            "Connected to MongoDB"
        );
        Ok(store)
    }

    async fn init(&self) -> Result<(), StorageError> {
        let unique_key = IndexModel::builder()
            .keys(doc! { "idempotency_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.journal.create_index(unique_key).await?;

        let by_account = IndexModel::builder()
            .keys(doc! { "account_id": 1, "date": 1 })
            .build();
        self.journal.create_index(by_account).await?;

        Ok(())
    }
}

#[async_trait]
impl Transactional for MongoStore {
    type Session = ClientSession;

    async fn start_session(&self) -> Result<ClientSession, StorageError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        Ok(session)
    }

    async fn commit(&self, mut session: ClientSession) -> Result<(), StorageError> {
        session.commit_transaction().await?;
        Ok(())
    }

    async fn abort(&self, mut session: ClientSession) -> Result<(), StorageError> {
        session.abort_transaction().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountLedger>, StorageError> {
        let filter = doc! { "_id": to_bson_id(account_id)? };
        self.ledgers
            .find_one(filter)
            .await?
            .map(|document| ledger_from_document(&document))
            .transpose()
    }

    async fn upsert(
        &self,
        session: &mut ClientSession,
        account_id: AccountId,
        delta: &LedgerDelta,
        precondition: &Precondition,
    ) -> Result<AccountLedger, StorageError> {
        let id = to_bson_id(account_id)?;

        if let Precondition::Absent = precondition {
            let ledger = AccountLedger::from_delta(account_id, delta);
            let mut document = ledger_fields(&ledger)?;
            document.insert("_id", id);
            return match self.ledgers.insert_one(document).session(&mut *session).await {
                Ok(_) => Ok(ledger),
                Err(e) if is_duplicate_key(&e) => Err(StorageError::write_conflict(account_id)),
                Err(e) => Err(e.into()),
            };
        }

        let mut filter = doc! { "_id": id };
        if let Precondition::Matches {
            balance,
            pincoin_balance,
        } = precondition
        {
            filter.insert("balance", to_units(*balance)?);
            filter.insert("pincoin_balance", to_units(*pincoin_balance)?);
        }
        let update = doc! { "$inc": delta_fields(delta)? };

        let updated = self
            .ledgers
            .find_one_and_update(filter, update)
            .upsert(matches!(precondition, Precondition::None))
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        match updated {
            Some(document) => ledger_from_document(&document),
            None => Err(StorageError::write_conflict(account_id)),
        }
    }

    async fn all(&self) -> Result<Vec<AccountLedger>, StorageError> {
        let cursor = self.ledgers.find(doc! {}).sort(doc! { "_id": 1 }).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents.iter().map(ledger_from_document).collect()
    }
}

#[async_trait]
impl JournalStore for MongoStore {
    async fn append(
        &self,
        session: &mut ClientSession,
        entry: &JournalEntry,
    ) -> Result<(), StorageError> {
        let document = journal_document(entry)?;
        match self.journal.insert_one(document).session(&mut *session).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StorageError::duplicate_key(
                entry.idempotency_key.as_str(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JournalEntry>, StorageError> {
        self.journal
            .find_one(doc! { "idempotency_key": key.as_str() })
            .await?
            .map(|document| journal_from_document(&document))
            .transpose()
    }

    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<JournalEntry>, StorageError> {
        let cursor = self
            .journal
            .find(doc! { "account_id": to_bson_id(account_id)? })
            .sort(doc! { "date": 1, "_id": 1 })
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents.iter().map(journal_from_document).collect()
    }
}

impl From<mongodb::error::Error> for StorageError {
    fn from(error: mongodb::error::Error) -> Self {
        if error.contains_label(TRANSIENT_TRANSACTION_ERROR)
            || error.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        {
            return StorageError::transient(error.to_string());
        }

        match *error.kind {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                StorageError::unavailable(error.to_string())
            }
            ErrorKind::BsonDeserialization(_) => StorageError::decode(error.to_string()),
            _ => StorageError::backend(error.to_string()),
        }
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write_err)) = *error.kind {
        return write_err.code == DUPLICATE_KEY_CODE;
    }
    false
}

fn to_bson_id(account_id: AccountId) -> Result<i64, StorageError> {
    i64::try_from(account_id)
        .map_err(|_| StorageError::backend(format!("account id {} exceeds Int64", account_id)))
}

fn from_bson_id(value: i64) -> Result<AccountId, StorageError> {
    AccountId::try_from(value)
        .map_err(|_| StorageError::decode(format!("negative account id {}", value)))
}

fn to_units(value: Decimal) -> Result<i64, StorageError> {
    (value * Decimal::from(10_i64.pow(UNIT_SCALE)))
        .round()
        .to_i64()
        .ok_or_else(|| StorageError::backend(format!("amount {} out of range", value)))
}

fn from_units(units: i64) -> Decimal {
    Decimal::new(units, UNIT_SCALE).normalize()
}

fn delta_fields(delta: &LedgerDelta) -> Result<Document, StorageError> {
    Ok(doc! {
        "balance": to_units(delta.balance)?,
        "pincoin_balance": to_units(delta.pincoin_balance)?,
        "deposit_all_sum": to_units(delta.deposit_all_sum)?,
        "deposit_count": delta.deposit_count as i64,
        "pincoins_all_sum": to_units(delta.pincoins_all_sum)?,
    })
}

fn ledger_fields(ledger: &AccountLedger) -> Result<Document, StorageError> {
    Ok(doc! {
        "balance": to_units(ledger.balance)?,
        "pincoin_balance": to_units(ledger.pincoin_balance)?,
        "deposit_all_sum": to_units(ledger.deposit_all_sum)?,
        "deposit_count": ledger.deposit_count as i64,
        "pincoins_all_sum": to_units(ledger.pincoins_all_sum)?,
    })
}

fn get_i64(document: &Document, field: &str) -> Result<i64, StorageError> {
    document
        .get_i64(field)
        .or_else(|_| document.get_i32(field).map(i64::from))
        .map_err(|e| StorageError::decode(format!("field '{}': {}", field, e)))
}

fn get_str<'a>(document: &'a Document, field: &str) -> Result<&'a str, StorageError> {
    document
        .get_str(field)
        .map_err(|e| StorageError::decode(format!("field '{}': {}", field, e)))
}

fn get_decimal(document: &Document, field: &str) -> Result<Decimal, StorageError> {
    let raw = get_str(document, field)?;
    Decimal::from_str(raw)
        .map_err(|e| StorageError::decode(format!("field '{}': {}", field, e)))
}

fn ledger_from_document(document: &Document) -> Result<AccountLedger, StorageError> {
    let account_id = from_bson_id(get_i64(document, "_id")?)?;
    ledger_from_fields(account_id, document)
}

fn ledger_from_fields(
    account_id: AccountId,
    document: &Document,
) -> Result<AccountLedger, StorageError> {
    Ok(AccountLedger {
        account_id,
        balance: from_units(get_i64(document, "balance")?),
        pincoin_balance: from_units(get_i64(document, "pincoin_balance")?),
        deposit_all_sum: from_units(get_i64(document, "deposit_all_sum")?),
        deposit_count: get_i64(document, "deposit_count")?.max(0) as u64,
        pincoins_all_sum: from_units(get_i64(document, "pincoins_all_sum")?),
    })
}

fn journal_document(entry: &JournalEntry) -> Result<Document, StorageError> {
    Ok(doc! {
        "_id": entry.id.to_string(),
        "account_id": to_bson_id(entry.account_id)?,
        "idempotency_key": entry.idempotency_key.as_str(),
        "transaction_id": entry.transaction_id.to_string(),
        "transaction_type": entry.transaction_type.as_str(),
        "project": &entry.project,
        "currency": entry.currency.to_string(),
        "date": BsonDateTime::from_millis(entry.date.timestamp_millis()),
        "change": entry.change.to_string(),
        "pincoin_change": entry.pincoin_change.to_string(),
        "delta": delta_fields(&entry.delta)?,
        "ledger": ledger_fields(&entry.ledger)?,
    })
}

fn journal_from_document(document: &Document) -> Result<JournalEntry, StorageError> {
    let decode = |field: &str, e: &dyn std::fmt::Display| {
        StorageError::decode(format!("field '{}': {}", field, e))
    };

    let account_id = from_bson_id(get_i64(document, "account_id")?)?;
    let id = Uuid::parse_str(get_str(document, "_id")?).map_err(|e| decode("_id", &e))?;
    let transaction_type = TransactionType::from_str(get_str(document, "transaction_type")?)
        .map_err(|e| decode("transaction_type", &e))?;
    let transaction_id = get_str(document, "transaction_id")?
        .parse::<TransactionId>()
        .map_err(|e| decode("transaction_id", &e))?;
    let currency = get_str(document, "currency")?
        .parse::<CurrencyId>()
        .map_err(|e| decode("currency", &e))?;
    let millis = document
        .get_datetime("date")
        .map_err(|e| decode("date", &e))?
        .timestamp_millis();
    let date = chrono::DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::decode(format!("date {} out of range", millis)))?;
    let delta = document
        .get_document("delta")
        .map_err(|e| decode("delta", &e))?;
    let ledger = document
        .get_document("ledger")
        .map_err(|e| decode("ledger", &e))?;
    let ledger = ledger_from_fields(account_id, ledger)?;
    let delta_ledger = ledger_from_fields(account_id, delta)?;

    Ok(JournalEntry {
        id,
        account_id,
        idempotency_key: IdempotencyKey::from_stored(get_str(document, "idempotency_key")?),
        transaction_id,
        transaction_type,
        project: get_str(document, "project")?.to_string(),
        currency,
        date,
        change: get_decimal(document, "change")?,
        pincoin_change: get_decimal(document, "pincoin_change")?,
        delta: LedgerDelta {
            balance: delta_ledger.balance,
            pincoin_balance: delta_ledger.pincoin_balance,
            deposit_all_sum: delta_ledger.deposit_all_sum,
            deposit_count: delta_ledger.deposit_count,
            pincoins_all_sum: delta_ledger.pincoins_all_sum,
        },
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeRequest;

    #[test]
    fn test_units_are_exact() {
        let amount = Decimal::from_str("-123.45").unwrap();

        assert_eq!(to_units(amount).unwrap(), -1_234_500);
        assert_eq!(from_units(-1_234_500), amount);
    }

    #[test]
    fn test_ledger_document_round_trip() {
        let mut ledger = AccountLedger::new(42);
        ledger.balance = Decimal::from_str("10.01").unwrap();
        ledger.deposit_count = 3;
        let mut document = ledger_fields(&ledger).unwrap();
        document.insert("_id", 42_i64);

        assert_eq!(ledger_from_document(&document).unwrap(), ledger);
    }

    #[test]
    fn test_journal_document_round_trip() {
        let change = Decimal::from_str("-5.5").unwrap();
        let request = ChangeRequest::new(7, 99, TransactionType::Bet, change).with_project("sport");
        let delta = LedgerDelta::balance(Decimal::from_str("-5.50").unwrap());
        let entry = JournalEntry::record(&request, delta, AccountLedger::from_delta(7, &delta));

        let decoded = journal_from_document(&journal_document(&entry).unwrap()).unwrap();

        assert_eq!(decoded.id, entry.id);
        assert_eq!(decoded.idempotency_key, entry.idempotency_key);
        assert_eq!(decoded.transaction_type, TransactionType::Bet);
        assert_eq!(decoded.change, entry.change);
        assert_eq!(decoded.delta, entry.delta);
        assert_eq!(decoded.ledger, entry.ledger);
        assert_eq!(decoded.date.timestamp_millis(), entry.date.timestamp_millis());
    }

    #[test]
    fn test_account_id_out_of_range() {
        assert!(to_bson_id(u64::MAX).is_err());
        assert!(from_bson_id(-1).is_err());
    }
}
