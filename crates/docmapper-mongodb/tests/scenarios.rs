//! End-to-end scenarios against the in-memory backend
//!
//! Every test builds its own `Odm`, so registries and stored data are
//! isolated per test.

use chrono::{TimeZone, Utc};
use docmapper_mongodb::{
    q, DocMapperError, DocumentMeta, Field, Model, Odm, SaveOptions, Schema, Value,
};
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};

const USERS: [(&str, &str, i64, &[&str]); 9] = [
    ("Lisa", "Bruce", 10, &["music"]),
    ("Michael", "Adams", 14, &["games", "music"]),
    ("Christina", "Parsons", 22, &[]),
    ("Christopher", "Smith", 24, &["sports"]),
    ("Cynthia", "Stevens", 28, &["music", "books"]),
    ("Jason", "Smith", 32, &["books"]),
    ("Lindsay", "Thompson", 34, &["sports", "games"]),
    ("Lisa", "Brown", 38, &["music"]),
    ("Stephanie", "Flores", 44, &["books"]),
];

fn user_model(odm: &Odm) -> Model {
    odm.register(
        Schema::builder("User")
            .field("first_name", Field::text().required())
            .field("last_name", Field::text())
            .field("age", Field::int())
            .field("like", Field::list(Field::text()))
            .meta(DocumentMeta::new().ordering(["age"])),
    )
    .unwrap()
}

async fn seed_users(users: &Model) {
    for (first, last, age, like) in USERS {
        assert_ok!(
            users
                .create([
                    ("first_name", Value::from(first)),
                    ("last_name", Value::from(last)),
                    ("age", Value::Int(age)),
                    ("like", Value::from(like.to_vec())),
                ])
                .await
        );
    }
}

#[test]
fn test_validate_reports_only_missing_required_field() {
    let odm = Odm::in_memory();
    let model = odm
        .register(
            Schema::builder("Person")
                .field("name", Field::text().required())
                .field("age", Field::int()),
        )
        .unwrap();

    let person = model.document_from([("age", Value::Int(5))]).unwrap();
    match person.validate() {
        Err(DocMapperError::Validation(errors)) => {
            assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["name"]);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_count_with_comparison_filter() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);
    seed_users(&users).await;

    let expected = USERS.iter().filter(|u| u.2 > 30).count() as u64;
    let count = users.objects().filter(q!(age__gt = 30)).unwrap().count().await.unwrap();
    assert_eq!(count, expected);
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_text_and_list_filters_over_fixture() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);
    seed_users(&users).await;
    let objects = users.objects();

    let lisas = objects.filter(q!(first_name__icontains = "lisa")).unwrap();
    assert_eq!(lisas.count().await.unwrap(), 2);

    let l_names = objects.filter(q!(first_name__istartswith = "l")).unwrap();
    assert_eq!(l_names.count().await.unwrap(), 3);
    assert_eq!(
        l_names.filter(q!(age__gt = 30)).unwrap().count().await.unwrap(),
        2
    );

    // A scalar against a list field is a membership test
    let music = objects.filter(q!(like = "music")).unwrap();
    assert_eq!(music.count().await.unwrap(), 4);

    let smiths = objects
        .filter(q!(last_name__exact = "Smith"))
        .unwrap()
        .order_by(["-age"])
        .all()
        .await
        .unwrap();
    let firsts: Vec<Value> = smiths.iter().map(|u| u.get("first_name").unwrap()).collect();
    assert_eq!(firsts, vec![Value::from("Jason"), Value::from("Christopher")]);

    let either = objects
        .filter(q!(age__lt = 12) | q!(age__gt = 40))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(either, 2);

    let not_music = objects.filter_not(q!(like = "music")).unwrap();
    assert_eq!(not_music.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_only_identity_loads_partly_and_refuses_save() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);
    seed_users(&users).await;

    let mut user = users.objects().only(["id"]).first().await.unwrap().unwrap();
    assert!(user.id().is_some());
    assert!(user.is_partly_loaded());
    assert_eq!(user.get("first_name").unwrap(), Value::Null);
    assert_eq!(user.get("age").unwrap(), Value::Null);
    assert_eq!(user.get("like").unwrap(), Value::List(vec![]));

    let err = user.save(&odm, SaveOptions::default()).await.unwrap_err();
    assert!(matches!(err, DocMapperError::PartlyLoaded(ref name) if name == "User"));

    user.reload(&odm, None).await.unwrap();
    assert!(!user.is_partly_loaded());
    assert_eq!(user.get("first_name").unwrap(), Value::from("Lisa"));
}

#[tokio::test]
async fn test_saved_values_round_trip_through_get() {
    let odm = Odm::in_memory();
    let address = Schema::builder("Address")
        .field("city", Field::text())
        .field("zip", Field::text())
        .meta(DocumentMeta::new().as_embedded())
        .build()
        .unwrap();
    let model = odm
        .register(
            Schema::builder("Profile")
                .field("name", Field::text().required())
                .field("age", Field::int())
                .field("score", Field::float())
                .field("balance", Field::decimal().precision(2))
                .field("active", Field::boolean())
                .field("joined", Field::datetime())
                .field("token", Field::uuid())
                .field("avatar", Field::binary())
                .field("tags", Field::list(Field::text()))
                .field("settings", Field::dict())
                .field("address", Field::embedded(&address)),
        )
        .unwrap();

    let joined = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        + chrono::Duration::nanoseconds(123_456_789);
    let mut profile = model
        .document_from([
            ("name", Value::from("Lisa")),
            ("age", Value::Int(34)),
            ("score", Value::Float(9.5)),
            ("balance", Value::Decimal(Decimal::new(12_345, 3))),
            ("active", Value::Bool(true)),
            ("joined", Value::from(joined)),
            ("token", Value::Uuid(uuid::Uuid::new_v4())),
            ("avatar", Value::bytes(vec![0u8, 1, 2])),
            ("tags", Value::from(vec!["a", "b"])),
            ("settings", Value::object([("theme", "dark")])),
            ("address", Value::object([("city", "Taipei"), ("zip", "100")])),
        ])
        .unwrap();

    // Normalized on assignment
    assert_eq!(profile.get("balance").unwrap(), Value::Decimal(Decimal::new(1235, 2)));
    let stored_joined = profile.get("joined").unwrap();
    assert_eq!(
        stored_joined.as_datetime().unwrap().timestamp_subsec_millis(),
        123
    );
    assert_eq!(stored_joined.as_datetime().unwrap().timestamp_subsec_nanos(), 123_000_000);

    assert!(profile.id().is_none());
    profile.save(&odm, SaveOptions::default()).await.unwrap();
    let id = profile.id().unwrap();

    let loaded = model.objects().get(q!(id = id.clone())).await.unwrap();
    for field in model.schema().fields() {
        assert_eq!(
            loaded.get(field.name()).unwrap(),
            profile.get(field.name()).unwrap(),
            "attribute {}",
            field.name()
        );
    }
    assert!(matches!(loaded.get("address").unwrap(), Value::Document(_)));
}

#[tokio::test]
async fn test_second_save_updates_instead_of_inserting() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);

    let mut user = users.document_from([("first_name", Value::from("Lisa"))]).unwrap();
    user.save(&odm, SaveOptions::default()).await.unwrap();
    let id = user.id().unwrap();

    user.set("age", 35).unwrap();
    user.save(&odm, SaveOptions::default()).await.unwrap();
    assert_eq!(user.id(), Some(id.clone()));
    assert_eq!(users.objects().count().await.unwrap(), 1);

    let stored = users.objects().with_id(id).await.unwrap().unwrap();
    assert_eq!(stored.get("age").unwrap(), Value::Int(35));
}

#[tokio::test]
async fn test_document_update_delete_and_reload() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);
    seed_users(&users).await;

    let mut lisa = users.objects().get(q!(last_name = "Bruce")).await.unwrap();
    let updated = lisa
        .update(
            &odm,
            docmapper_mongodb::Update::new().inc("age", 1).push("like", "art"),
            None,
        )
        .await
        .unwrap();
    assert!(updated);
    assert_eq!(lisa.get("age").unwrap(), Value::Int(11));
    assert_eq!(
        lisa.get("like").unwrap(),
        Value::from(vec!["music", "art"])
    );

    assert_eq!(lisa.delete(&odm, None).await.unwrap(), 1);
    assert!(lisa.reload(&odm, None).await.unwrap_err().is_not_found());
    assert_eq!(users.objects().count().await.unwrap(), 8);
}

#[tokio::test]
async fn test_unsaved_document_cannot_be_deleted() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);
    let user = users.document_from([("first_name", Value::from("Lisa"))]).unwrap();
    assert!(matches!(
        user.delete(&odm, None).await,
        Err(DocMapperError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_save_validates_unless_disabled() {
    let odm = Odm::in_memory();
    let users = user_model(&odm);

    let mut user = users.document_from([("age", Value::Int(3))]).unwrap();
    let err = assert_err!(user.save(&odm, SaveOptions::default()).await);
    assert!(matches!(err, DocMapperError::Validation(_)));
    assert_eq!(users.objects().count().await.unwrap(), 0);

    assert_ok!(user.save(&odm, SaveOptions::new().without_validation()).await);
    assert_eq!(users.objects().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_alias_selects_connection() {
    let odm = Odm::in_memory();
    odm.connections().register(
        "archive",
        std::sync::Arc::new(docmapper_mongodb::MemoryConnector::new("archive")),
    );
    let users = user_model(&odm);

    let mut user = users.document_from([("first_name", Value::from("Lisa"))]).unwrap();
    user.save(&odm, SaveOptions::new().alias("archive")).await.unwrap();

    assert_eq!(users.objects().count().await.unwrap(), 0);
    assert_eq!(users.objects().using("archive").count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reload_and_update_follow_alias() {
    let odm = Odm::in_memory();
    odm.connections().register(
        "archive",
        std::sync::Arc::new(docmapper_mongodb::MemoryConnector::new("archive")),
    );
    let users = user_model(&odm);

    let mut user = users
        .document_from([("first_name", Value::from("Lisa")), ("age", Value::Int(10))])
        .unwrap();
    user.save(&odm, SaveOptions::new().alias("archive")).await.unwrap();

    let mut archived = users.objects().using("archive").get(q!(first_name = "Lisa")).await.unwrap();
    assert_eq!(users.objects().count().await.unwrap(), 0);

    let updated = archived
        .update(&odm, docmapper_mongodb::Update::new().inc("age", 1), Some("archive"))
        .await
        .unwrap();
    assert!(updated);
    assert_eq!(archived.get("age").unwrap(), Value::Int(11));

    user.reload(&odm, Some("archive")).await.unwrap();
    assert_eq!(user.get("age").unwrap(), Value::Int(11));

    assert!(user.reload(&odm, None).await.unwrap_err().is_not_found());
    let missed = user
        .update(&odm, docmapper_mongodb::Update::new().inc("age", 1), None)
        .await
        .unwrap();
    assert!(!missed);
}
