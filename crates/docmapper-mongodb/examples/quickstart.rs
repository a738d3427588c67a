//! Quickstart Example
//!
//! Declares a document type, stores a few documents and queries them.
//! Uses a live server when DOCMAPPER_MONGODB_URI is set, the in-memory
//! backend otherwise.
//!
//! Run with:
//! ```bash
//! cargo run -p docmapper-mongodb --example quickstart
//! ```

use docmapper_mongodb::{
    q, ConnectionConfig, DocumentMeta, Field, Odm, Result, SaveOptions, Schema, Update, Value,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let odm = if std::env::var("DOCMAPPER_MONGODB_URI").is_ok() {
        let odm = Odm::new();
        odm.connections()
            .connect("default", &ConnectionConfig::from_env()?)
            .await?;
        odm
    } else {
        Odm::in_memory()
    };

    // ========================================================================
    // Declare
    // ========================================================================

    let users = odm.register(
        Schema::builder("User")
            .field("name", Field::text().required().max_length(50))
            .field("age", Field::int().min_value(0))
            .field("like", Field::list(Field::text()))
            .field("joined", Field::datetime().auto_now_on_insert())
            .meta(DocumentMeta::new().ordering(["-age"])),
    )?;
    users.drop_collection(None).await?;

    // ========================================================================
    // Store
    // ========================================================================

    for (name, age, like) in [
        ("Lisa Bruce", 10, vec!["music"]),
        ("Jason Smith", 32, vec!["books"]),
        ("Lisa Brown", 38, vec!["music", "books"]),
    ] {
        users
            .create([
                ("name", Value::from(name)),
                ("age", Value::Int(age)),
                ("like", Value::from(like)),
            ])
            .await?;
    }

    let mut invalid = users.document_from([("age", Value::Int(-1))])?;
    if let Err(e) = invalid.save(&odm, SaveOptions::default()).await {
        info!("rejected: {}", e);
    }

    // ========================================================================
    // Query
    // ========================================================================

    let lisas = users.objects().filter(q!(name__istartswith = "lisa"))?;
    info!("{} users named Lisa", lisas.count().await?);

    for user in lisas.filter(q!(like = "books"))?.all().await? {
        info!("{}", user.to_json());
    }

    users
        .objects()
        .filter(q!(age__lt = 18))?
        .update(Update::new().inc("age", 1), false)
        .await?;
    info!("average age: {:?}", users.objects().average("age").await?);

    Ok(())
}
