//! End-to-end tests for the parameter ingestion path: collect → resolve →
//! batch insert, with cache promotion on commit and retry on transient
//! locking failures.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use common::MockStore;
use meridian_persistence::cache::{
    ParameterIdentityCache, SharedIdentityCache, TransactionCache,
};
use meridian_persistence::config::{CacheConfig, PersistenceConfig};
use meridian_persistence::params::{
    CommonTokenValueKey, DateParameter, NumberParameter, ParamIngestionSession, ParameterRow,
    PlainParamValueProcessor, ProfileParameter, QuantityParameter, ReferenceParameter,
    SecurityParameter, StringParameter, TagParameter, TokenParameter,
};
use meridian_persistence::tenant::{DatastoreId, RequestContext, ShardKey, TenantId};

const MRN_SYSTEM: &str = "http://hospital.example.org/mrn";

fn primed_shared(config: &CacheConfig) -> Arc<SharedIdentityCache> {
    let shared = Arc::new(SharedIdentityCache::new(config));
    shared.prime_resource_types(vec![
        ("Patient".to_string(), 1),
        ("Observation".to_string(), 2),
        ("Practitioner".to_string(), 3),
    ]);
    shared
}

fn new_session(
    store: &Arc<MockStore>,
    shared: &Arc<SharedIdentityCache>,
    config: &PersistenceConfig,
) -> ParamIngestionSession<PlainParamValueProcessor<Arc<MockStore>>> {
    let ctx = RequestContext::new(TenantId::new("acme"), DatastoreId::default_store());
    ParamIngestionSession::new(
        ctx,
        PlainParamValueProcessor::new(Arc::clone(store), config.batch.clone()),
        TransactionCache::new(Arc::clone(shared)),
        &config.batch,
    )
}

#[tokio::test]
async fn test_ingest_flow_end_to_end() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);
    let mut session = new_session(&store, &shared, &config);

    let birthdate = Utc.with_ymd_and_hms(1980, 5, 1, 0, 0, 0).unwrap();
    session.collect_string("Patient", "p1", 1001, StringParameter::new("family", "Smith"));
    session.collect_token(
        "Patient",
        "p1",
        1001,
        TokenParameter::new("identifier", MRN_SYSTEM, "12345"),
    );
    session.collect_date(
        "Patient",
        "p1",
        1001,
        DateParameter::new("birthdate", birthdate, birthdate),
    );
    session.collect_profile(
        "Patient",
        "p1",
        1001,
        ProfileParameter::new("http://example.org/StructureDefinition/core-patient"),
    );
    session.collect_tag(
        "Patient",
        "p1",
        1001,
        TagParameter::new("http://example.org/tags", "vip"),
    );
    session.collect_security(
        "Patient",
        "p1",
        1001,
        SecurityParameter::new("http://terminology.example.org/security", "R"),
    );
    session.collect_number(
        "Observation",
        "o1",
        2001,
        NumberParameter::new("sequence", Decimal::new(4, 0)),
    );
    session.collect_quantity(
        "Observation",
        "o1",
        2001,
        QuantityParameter::new("value-quantity", Decimal::new(1850, 1))
            .with_coding("http://unitsofmeasure.org", "cm"),
    );
    // the referenced Patient identity is pre-registered even though the
    // reference is collected on the Observation
    session
        .collect_reference(
            "Observation",
            "o1",
            2001,
            ReferenceParameter::new("subject", "Patient", "p2-not-yet-created"),
        )
        .unwrap();

    session.flush().await.unwrap();
    session.on_commit();

    let rows = store.rows();
    assert_eq!(rows.len(), 9);
    assert_eq!(store.logical_ident_dictionary_len(), 1);
    assert_eq!(store.canonical_dictionary_len(), 1);
    // mrn, tag, security and unit code systems
    assert_eq!(store.code_system_dictionary_len(), 4);

    // every token-shaped row references a resolved dictionary id
    let token_ids: Vec<i64> = rows
        .iter()
        .filter_map(|row| match row {
            ParameterRow::Token {
                common_token_value_id,
                ..
            }
            | ParameterRow::Tag {
                common_token_value_id,
                ..
            }
            | ParameterRow::Security {
                common_token_value_id,
                ..
            } => Some(*common_token_value_id),
            _ => None,
        })
        .collect();
    assert_eq!(token_ids.len(), 3);

    // commit promoted the minted ids into the shared cache
    assert!(shared.get_parameter_name_id("family").is_some());
    let mrn_system_id = shared.get_code_system_id(MRN_SYSTEM).unwrap();
    let key = CommonTokenValueKey::new(ShardKey::FIXED, mrn_system_id, "12345");
    assert!(shared.get_common_token_value_id(&key).is_some());
}

#[tokio::test]
async fn test_batch_boundedness_per_distinct_kind() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);
    let mut session = new_session(&store, &shared, &config);

    // 50 values, all referencing ONE distinct (system, code) pair and one
    // parameter name
    for i in 0..50 {
        session.collect_token(
            "Patient",
            &format!("p{i}"),
            1000 + i,
            TokenParameter::new("identifier", MRN_SYSTEM, "dup"),
        );
    }
    session.flush().await.unwrap();

    // statement counts scale with distinct keys, not with value count:
    // one fetch miss, one insert, one re-fetch per kind
    assert!(store.statement_count("fetch_code_systems") <= 2);
    assert_eq!(store.statement_count("insert_code_systems"), 1);
    assert!(store.statement_count("fetch_token_values") <= 2);
    assert_eq!(store.statement_count("insert_token_values"), 1);
    assert_eq!(store.statement_count("create_parameter_name"), 1);
    // 50 rows fit one batch statement
    assert_eq!(store.statement_count("insert_parameter_rows"), 1);
    assert_eq!(store.rows().len(), 50);
    assert_eq!(store.token_dictionary_len(), 1);

    session.on_commit();

    // a warm second transaction resolves everything from the shared cache
    let fetches_before = store.statement_count("fetch_token_values");
    let mut second = new_session(&store, &shared, &config);
    second.collect_token(
        "Patient",
        "p99",
        2000,
        TokenParameter::new("identifier", MRN_SYSTEM, "dup"),
    );
    second.flush().await.unwrap();
    assert_eq!(store.statement_count("fetch_token_values"), fetches_before);
}

#[tokio::test]
async fn test_idempotent_resolution_across_eviction() {
    let store = MockStore::new();
    let mut config = PersistenceConfig::default();
    // a single-entry token tier forces eviction on the second key
    config.cache.common_token_values = 1;
    let shared = primed_shared(&config.cache);

    let mut first = new_session(&store, &shared, &config);
    first.collect_token(
        "Patient",
        "p1",
        1001,
        TokenParameter::new("identifier", MRN_SYSTEM, "key-one"),
    );
    first.flush().await.unwrap();
    first.on_commit();

    let system_id = shared.get_code_system_id(MRN_SYSTEM).unwrap();
    let key_one = CommonTokenValueKey::new(ShardKey::FIXED, system_id, "key-one");
    let id_one = shared.get_common_token_value_id(&key_one).unwrap();

    // resolving a second key evicts the first from the bounded tier
    let mut second = new_session(&store, &shared, &config);
    second.collect_token(
        "Patient",
        "p2",
        1002,
        TokenParameter::new("identifier", MRN_SYSTEM, "key-two"),
    );
    second.flush().await.unwrap();
    second.on_commit();
    assert_eq!(shared.get_common_token_value_id(&key_one), None);

    // a third transaction re-resolves key-one from the database: same id,
    // no new dictionary row
    let mut third = new_session(&store, &shared, &config);
    third.collect_token(
        "Patient",
        "p3",
        1003,
        TokenParameter::new("identifier", MRN_SYSTEM, "key-one"),
    );
    third.flush().await.unwrap();
    third.on_commit();

    assert_eq!(shared.get_common_token_value_id(&key_one), Some(id_one));
    assert_eq!(store.token_dictionary_len(), 2);
}

#[tokio::test]
async fn test_rollback_isolation() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);

    let mut aborted = new_session(&store, &shared, &config);
    aborted.collect_token(
        "Patient",
        "p1",
        1001,
        TokenParameter::new("identifier", MRN_SYSTEM, "rolled-back"),
    );
    aborted.flush().await.unwrap();
    // the transaction is abandoned: database work rolls back, local cache
    // entries are discarded
    aborted.on_rollback();
    store.roll_back_dictionaries();

    // nothing leaked into the shared cache
    assert_eq!(shared.get_code_system_id(MRN_SYSTEM), None);
    assert_eq!(shared.get_parameter_name_id("identifier"), None);

    // another transaction resolving the same key performs a fresh
    // select-or-insert
    let inserts_before = store.statement_count("insert_token_values");
    let mut fresh = new_session(&store, &shared, &config);
    fresh.collect_token(
        "Patient",
        "p2",
        1002,
        TokenParameter::new("identifier", MRN_SYSTEM, "rolled-back"),
    );
    fresh.flush().await.unwrap();
    fresh.on_commit();

    assert_eq!(store.statement_count("insert_token_values"), inserts_before + 1);
    assert_eq!(store.token_dictionary_len(), 1);
    let system_id = shared.get_code_system_id(MRN_SYSTEM).unwrap();
    let key = CommonTokenValueKey::new(ShardKey::FIXED, system_id, "rolled-back");
    assert!(shared.get_common_token_value_id(&key).is_some());
}

#[tokio::test]
async fn test_deadlock_on_row_push_is_retried() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);
    let mut session = new_session(&store, &shared, &config);

    session.collect_string("Patient", "p1", 1001, StringParameter::new("family", "Jones"));
    session.collect_token(
        "Patient",
        "p1",
        1001,
        TokenParameter::new("identifier", MRN_SYSTEM, "42"),
    );

    store.arm_row_push_deadlocks(1);
    session.flush().await.unwrap();

    // the failed push plus the successful retry
    assert_eq!(store.statement_count("insert_parameter_rows"), 2);
    // rows landed exactly once
    assert_eq!(store.rows().len(), 2);
}

#[tokio::test]
async fn test_deadlock_on_dictionary_insert_is_retried() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);
    let mut session = new_session(&store, &shared, &config);

    session.collect_token(
        "Patient",
        "p1",
        1001,
        TokenParameter::new("identifier", MRN_SYSTEM, "42"),
    );

    store.arm_token_insert_deadlocks(1);
    session.flush().await.unwrap();

    assert_eq!(store.statement_count("insert_token_values"), 2);
    assert_eq!(store.token_dictionary_len(), 1);
    assert_eq!(store.rows().len(), 1);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let store = MockStore::new();
    let mut config = PersistenceConfig::default();
    config.batch.max_batch_retries = 2;
    let shared = primed_shared(&config.cache);
    let mut session = new_session(&store, &shared, &config);

    session.collect_string("Patient", "p1", 1001, StringParameter::new("family", "Ng"));

    store.arm_row_push_deadlocks(10);
    let err = session.flush().await.unwrap_err();
    assert!(err.is_retryable());
    // initial attempt plus two retries, then give up
    assert_eq!(store.statement_count("insert_parameter_rows"), 3);
    assert!(store.rows().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_yields_single_row() {
    let store = MockStore::new();
    let config = PersistenceConfig::default();
    let shared = primed_shared(&config.cache);

    let mut handles = Vec::new();
    for worker in 0..8i64 {
        let store = Arc::clone(&store);
        let shared = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            let config = PersistenceConfig::default();
            let ctx = RequestContext::new(TenantId::new("acme"), DatastoreId::default_store());
            let mut session = ParamIngestionSession::new(
                ctx,
                PlainParamValueProcessor::new(store, config.batch.clone()),
                TransactionCache::new(shared),
                &config.batch,
            );
            session.collect_token(
                "Patient",
                &format!("p{worker}"),
                1000 + worker,
                TokenParameter::new("identifier", MRN_SYSTEM, "contended"),
            );
            session.flush().await.unwrap();
            session.on_commit();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // exactly one dictionary row for the contended (system, code) pair
    assert_eq!(store.token_dictionary_len(), 1);

    // and every transaction observed the same id
    let ids: HashSet<i64> = store
        .rows()
        .iter()
        .filter_map(|row| match row {
            ParameterRow::Token {
                common_token_value_id,
                ..
            } => Some(*common_token_value_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 1);
}
