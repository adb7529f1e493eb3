//! Merge conservation: after merge(source -> target) every notice references
//! the target, the source row is gone, and the counter plus seen-time span
//! fold both originals.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use fl_db::{NewFault, NewNotice};

fn fault_for(class: &str, env: &str) -> NewFault {
    NewFault {
        error_class: class.to_string(),
        location: "lib/handler.rs:7".to_string(),
        environment: env.to_string(),
        message: "merge me".to_string(),
    }
}

fn plain_notice() -> NewNotice {
    NewNotice {
        message: "occurrence".to_string(),
        backtrace: json!([]),
        context: None,
        params: None,
        session: None,
        cookies: None,
        environment: "production".to_string(),
        breadcrumbs: json!([]),
        hostname: None,
        revision: None,
    }
}

#[tokio::test]
async fn merge_folds_counts_and_reparents_notices() {
    let Some(pool) = fl_db::testkit_db_pool().await.unwrap() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let tag = Uuid::new_v4().simple().to_string();
    let source =
        fl_db::upsert_fault_by_fingerprint(&pool, &fault_for(&format!("Src{tag}"), "prod"), Utc::now())
            .await
            .unwrap();
    let target =
        fl_db::upsert_fault_by_fingerprint(&pool, &fault_for(&format!("Dst{tag}"), "prod"), Utc::now())
            .await
            .unwrap();

    for _ in 0..3 {
        fl_db::record_occurrence(&pool, source.id, Utc::now(), &plain_notice())
            .await
            .unwrap();
    }
    for _ in 0..2 {
        fl_db::record_occurrence(&pool, target.id, Utc::now(), &plain_notice())
            .await
            .unwrap();
    }

    let merged = fl_db::merge_faults(&pool, source.id, target.id)
        .await
        .unwrap()
        .expect("both faults exist");

    assert_eq!(merged.id, target.id);
    assert_eq!(merged.occurrence_count, 5);
    assert_eq!(fl_db::count_notices(&pool, target.id).await.unwrap(), 5);
    assert_eq!(fl_db::count_notices(&pool, source.id).await.unwrap(), 0);

    let gone = fl_db::get_fault(&pool, source.id).await.unwrap();
    assert!(gone.is_none(), "source fault row must be deleted");

    let refreshed = fl_db::get_fault(&pool, target.id).await.unwrap().unwrap();
    assert!(refreshed.first_seen_at <= refreshed.last_seen_at);
    assert!(refreshed.first_seen_at <= source.first_seen_at);
}

#[tokio::test]
async fn merge_with_unknown_fault_is_none() {
    let Some(pool) = fl_db::testkit_db_pool().await.unwrap() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let tag = Uuid::new_v4().simple().to_string();
    let target =
        fl_db::upsert_fault_by_fingerprint(&pool, &fault_for(&format!("Only{tag}"), "prod"), Utc::now())
            .await
            .unwrap();

    let merged = fl_db::merge_faults(&pool, Uuid::new_v4(), target.id)
        .await
        .unwrap();
    assert!(merged.is_none());

    // Target is untouched by the failed merge.
    let still = fl_db::get_fault(&pool, target.id).await.unwrap().unwrap();
    assert_eq!(still.occurrence_count, 0);
}
