//! Query lowering and execution through nested schemas
//!
//! Covers filter keys that descend into embedded documents and lists,
//! negation shapes, projections and atomic updates, against the
//! in-memory backend.

use std::sync::Arc;

use bson::{doc, Bson};
use docmapper_mongodb::{
    q, Document, DocumentMeta, Field, FieldSpec, Model, Odm, OperatorRegistry, QueryOperator, Schema,
    Slice, Update, Value,
};

fn post_model(odm: &Odm) -> Model {
    let author = Schema::builder("Author")
        .field("name", Field::text())
        .field("email", Field::text().storage_key("e"))
        .meta(DocumentMeta::new().as_embedded())
        .build()
        .unwrap();
    let comment = Schema::builder("Comment")
        .field("text", Field::text())
        .field("votes", Field::int())
        .meta(DocumentMeta::new().as_embedded())
        .build()
        .unwrap();
    odm.register(
        Schema::builder("BlogPost")
            .field("title", Field::text().required())
            .field("views", Field::int().default(0))
            .field("author", Field::embedded(&author))
            .field("comments", Field::list(Field::embedded(&comment)))
            .field("tags", Field::list(Field::text()))
            .field("extra", Field::dict()),
    )
    .unwrap()
}

fn comment(text: &str, votes: i64) -> Value {
    Value::object([("text", Value::from(text)), ("votes", Value::Int(votes))])
}

async fn seed(posts: &Model) {
    let rows = [
        ("Intro", 10, "Lisa", "lisa@example.com", vec![comment("nice", 4)], vec!["rust", "db"]),
        ("Queries", 50, "Jason", "jason@example.com", vec![comment("meh", 1), comment("more", 2)], vec!["db"]),
        ("Indexes", 5, "Lisa", "lisa@example.com", vec![], vec!["db", "perf"]),
    ];
    for (title, views, name, email, comments, tags) in rows {
        posts
            .create([
                ("title", Value::from(title)),
                ("views", Value::Int(views)),
                ("author", Value::object([("name", name), ("email", email)])),
                ("comments", Value::List(comments)),
                ("tags", Value::from(tags)),
                ("extra", Value::object([("lang", "en")])),
            ])
            .await
            .unwrap();
    }
}

fn titles(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|d| d.get("title").unwrap().as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_nested_paths_lower_to_storage_keys() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    let objects = posts.objects();

    let by_email = objects.filter(q!(author__email = "lisa@example.com")).unwrap();
    assert_eq!(by_email.query().unwrap(), doc! { "author.e": "lisa@example.com" });

    let dotted = objects
        .filter(docmapper_mongodb::Q::new().with("author.email", "lisa@example.com"))
        .unwrap();
    assert_eq!(dotted.query().unwrap(), by_email.query().unwrap());

    let votes = objects.filter(q!(comments__votes__gte = 3)).unwrap();
    assert_eq!(votes.query().unwrap(), doc! { "comments.votes": { "$gte": 3 } });

    let schemaless = objects.filter(q!(extra__lang = "en")).unwrap();
    assert_eq!(schemaless.query().unwrap(), doc! { "extra.lang": "en" });

    let bad = objects.filter(q!(views__missing = 1)).unwrap_err();
    assert!(bad.is_caller_recoverable());
}

#[test]
fn test_negation_shapes() {
    let odm = Odm::in_memory();
    let objects = post_model(&odm).objects();

    let ne = objects.filter(q!(views__not = 5)).unwrap();
    assert_eq!(ne.query().unwrap(), doc! { "views": { "$ne": 5 } });

    let not_gt = objects.filter(q!(views__not__gt = 5)).unwrap();
    assert_eq!(not_gt.query().unwrap(), doc! { "views": { "$not": { "$gt": 5 } } });

    let not_in = objects.filter_not(q!(views__in = vec![1, 2])).unwrap();
    assert_eq!(not_in.query().unwrap(), doc! { "views": { "$not": { "$in": [1, 2] } } });

    let not_exists = objects.filter_not(q!(title__exists = true)).unwrap();
    assert_eq!(not_exists.query().unwrap(), doc! { "title": { "$exists": false } });

    let not_either = objects.filter_not(q!(views = 1) | q!(title = "Intro")).unwrap();
    assert_eq!(
        not_either.query().unwrap(),
        doc! { "$nor": [ { "$or": [ { "views": 1 }, { "title": "Intro" } ] } ] }
    );
}

#[test]
fn test_chained_filters_merge_or_conjoin() {
    let odm = Odm::in_memory();
    let objects = post_model(&odm).objects();

    let merged = objects
        .filter(q!(title = "Intro"))
        .unwrap()
        .filter(q!(views__gt = 1))
        .unwrap();
    assert_eq!(
        merged.query().unwrap(),
        doc! { "title": "Intro", "views": { "$gt": 1 } }
    );

    let same_key = objects
        .filter(q!(views__gt = 1))
        .unwrap()
        .filter(q!(views__lt = 9))
        .unwrap();
    assert_eq!(same_key.query().unwrap(), doc! { "views": { "$gt": 1, "$lt": 9 } });

    let repeated = objects
        .filter(q!(views = 1))
        .unwrap()
        .filter(q!(views = 2))
        .unwrap();
    assert_eq!(
        repeated.query().unwrap(),
        doc! { "$and": [ { "views": 1 }, { "views": 2 } ] }
    );
}

#[tokio::test]
async fn test_stacked_predicates_on_one_path_all_apply() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    seed(&posts).await;
    let objects = posts.objects();

    let bounded = objects
        .filter(q!(title__startswith = "I"))
        .unwrap()
        .filter(q!(title__endswith = "s"))
        .unwrap();
    assert_eq!(
        bounded.query().unwrap(),
        doc! { "$and": [ { "title": { "$regex": "s$" } }, { "title": { "$regex": "^I" } } ] }
    );
    assert_eq!(titles(&bounded.all().await.unwrap()), vec!["Indexes"]);

    let neither = objects.filter(q!(views__ne = 10, views__not = 50)).unwrap();
    assert_eq!(
        neither.query().unwrap(),
        doc! { "$and": [ { "views": { "$ne": 10 } }, { "views": { "$ne": 50 } } ] }
    );
    assert_eq!(titles(&neither.all().await.unwrap()), vec!["Indexes"]);

    let duplicated = objects
        .filter(docmapper_mongodb::Q::new().with("title__contains", "e").with("title__contains", "Q"))
        .unwrap();
    assert_eq!(titles(&duplicated.all().await.unwrap()), vec!["Queries"]);

    let unmatched = objects
        .filter(q!(title__contains = "n"))
        .unwrap()
        .filter(q!(title__contains = "Q"))
        .unwrap();
    assert_eq!(unmatched.delete().await.unwrap(), 0);
    assert_eq!(objects.count().await.unwrap(), 3);

    let both = objects
        .filter(q!(title__contains = "e"))
        .unwrap()
        .filter(q!(title__contains = "x"))
        .unwrap();
    assert_eq!(both.delete().await.unwrap(), 1);
    assert_eq!(objects.count().await.unwrap(), 2);
}

#[test]
fn test_literal_match_escapes_metacharacters() {
    let odm = Odm::in_memory();
    let objects = post_model(&odm).objects();

    let literal = objects.filter(q!(title__contains = "a.b")).unwrap();
    assert_eq!(literal.query().unwrap(), doc! { "title": { "$regex": "a\\.b" } });

    let pattern = objects.filter(q!(title__iregex = "^a.b")).unwrap();
    assert_eq!(
        pattern.query().unwrap(),
        doc! { "title": { "$regex": "^a.b", "$options": "i" } }
    );
}

#[tokio::test]
async fn test_filters_over_nested_values() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    seed(&posts).await;
    let objects = posts.objects().order_by(["title"]);

    let lisa = objects.filter(q!(author__name = "Lisa")).unwrap().all().await.unwrap();
    assert_eq!(titles(&lisa), vec!["Indexes", "Intro"]);

    let popular = objects
        .filter(q!(comments__votes__gte = 3))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(titles(&popular), vec!["Intro"]);

    let tagged = objects
        .filter(q!(tags__in = vec!["perf", "rust"]))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(titles(&tagged), vec!["Indexes", "Intro"]);

    let quiet = objects.filter_not(q!(tags = "rust")).unwrap().count().await.unwrap();
    assert_eq!(quiet, 2);

    let stored = objects.filter(q!(title = "Intro")).unwrap().first().await.unwrap().unwrap();
    let author = stored.get("author").unwrap();
    assert_eq!(
        author.as_document().unwrap().get("email").unwrap(),
        Value::from("lisa@example.com")
    );
}

#[tokio::test]
async fn test_exclude_and_only_compose_in_either_order() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    seed(&posts).await;
    let intro = posts.objects().filter(q!(title = "Intro")).unwrap();

    let narrowed = intro.only(["title", "views"]).exclude(["views"]).first().await.unwrap().unwrap();
    assert_eq!(narrowed.get("title").unwrap(), Value::from("Intro"));
    assert_eq!(narrowed.get("views").unwrap(), Value::Int(0));
    assert!(narrowed.id().is_some());

    let restored = intro.exclude(["views"]).only(["views"]).first().await.unwrap().unwrap();
    assert_eq!(restored.get("views").unwrap(), Value::Int(10));
    assert_eq!(restored.get("title").unwrap(), Value::Null);

    let full = intro.only(["title"]).all_fields().first().await.unwrap().unwrap();
    assert!(!full.is_partly_loaded());
    assert_eq!(full.get("views").unwrap(), Value::Int(10));
}

#[tokio::test]
async fn test_slice_projection_trims_lists() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    seed(&posts).await;

    let post = posts
        .objects()
        .filter(q!(title = "Queries"))
        .unwrap()
        .fields([("comments", FieldSpec::Slice(Slice::First(1)))])
        .first()
        .await
        .unwrap()
        .unwrap();
    assert!(post.is_partly_loaded());
    assert_eq!(post.get("comments").unwrap().as_list().map(|c| c.len()), Some(1));
    assert_eq!(post.get("views").unwrap(), Value::Int(50));
}

#[tokio::test]
async fn test_atomic_updates_through_nested_paths() {
    let odm = Odm::in_memory();
    let posts = post_model(&odm);
    seed(&posts).await;
    let lisa = posts.objects().filter(q!(author__name = "Lisa")).unwrap();

    let outcome = lisa
        .update(
            Update::new()
                .set("author__email", "lisa@docs.example")
                .inc("views", 1)
                .add_to_set("tags", "db"),
            false,
        )
        .await
        .unwrap();
    assert_eq!(outcome.matched, 2);

    let raw = posts
        .objects()
        .filter(q!(title = "Intro"))
        .unwrap()
        .first_raw()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.get_document("author").unwrap().get_str("e").unwrap(), "lisa@docs.example");
    assert_eq!(raw.get("views"), Some(&Bson::Int32(11)));
    assert_eq!(
        raw.get_array("tags").unwrap(),
        &vec![Bson::String("rust".into()), Bson::String("db".into())]
    );

    let missing = posts
        .objects()
        .filter(q!(title = "Drafts"))
        .unwrap()
        .update_or_create(Update::new().set("views", 1))
        .await
        .unwrap();
    assert!(missing.upserted_id.is_some());
    let draft = posts.objects().get(q!(title = "Drafts")).await.unwrap();
    assert_eq!(draft.get("views").unwrap(), Value::Int(1));

    let invalid = lisa.update(Update::new().inc("views", "one"), false).await;
    assert!(invalid.is_err());
}

#[derive(Debug)]
struct SizeOperator;

impl QueryOperator for SizeOperator {
    fn name(&self) -> &str {
        "size"
    }

    fn lower(&self, _field: Option<&Field>, key: &str, value: &Value) -> docmapper_mongodb::Result<Bson> {
        match value.as_i64() {
            Some(n) => Ok(Bson::Document(doc! { "$size": n })),
            None => Err(docmapper_mongodb::DocMapperError::invalid_filter(key, "expects an integer")),
        }
    }
}

#[tokio::test]
async fn test_custom_operator() {
    let mut operators = OperatorRegistry::builtin();
    assert!(operators.register(Arc::new(SizeOperator)));
    assert!(!operators.register(Arc::new(SizeOperator)));

    let odm = Odm::in_memory().with_operators(operators);
    let posts = post_model(&odm);
    seed(&posts).await;

    let two_tags = posts.objects().filter(q!(tags__size = 2)).unwrap();
    assert_eq!(two_tags.query().unwrap(), doc! { "tags": { "$size": 2_i64 } });
    assert_eq!(two_tags.count().await.unwrap(), 2);
}
