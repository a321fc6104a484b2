use marketplace_scraper::error::ScraperError;
use marketplace_scraper::storage::{load_products, CsvRecordSink, RecordSink};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[tokio::test]
async fn writes_sorted_union_header() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    let mut sink = CsvRecordSink::create(&path)?;

    sink.write_batch(&[
        json!({"name": "a", "price": 1}),
        json!({"id": 9, "name": "b"}),
    ])
    .await?;
    drop(sink);

    let mut reader = csv::Reader::from_path(&path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(headers, vec!["id", "name", "price"]);

    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2);
    // record one had no id, record two no price
    assert_eq!(&rows[0][0], "");
    assert_eq!(&rows[0][1], "a");
    assert_eq!(&rows[0][2], "1");
    assert_eq!(&rows[1][0], "9");
    assert_eq!(&rows[1][2], "");
    Ok(())
}

#[tokio::test]
async fn nested_values_become_compact_json_cells() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    let mut sink = CsvRecordSink::create(&path)?;

    sink.write_batch(&[json!({"id": 1, "badges": [{"code": "new"}], "visible": true})])
        .await?;
    drop(sink);

    let mut reader = csv::Reader::from_path(&path)?;
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    // columns sort to badges, id, visible
    assert_eq!(&rows[0][0], r#"[{"code":"new"}]"#);
    assert_eq!(&rows[0][1], "1");
    assert_eq!(&rows[0][2], "true");
    Ok(())
}

#[tokio::test]
async fn appends_batches_without_repeating_header() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    let mut sink = CsvRecordSink::append_to(&path)?;

    sink.write_batch(&[json!({"id": 1, "name": "one"})]).await?;

    // each batch flushes, so the file is readable mid-crawl
    let after_first = fs::read_to_string(&path)?;
    assert_eq!(after_first.lines().count(), 2);

    sink.write_batch(&[json!({"id": 2}), json!({"id": 3, "name": "three", "extra": "ZED"})])
        .await?;
    drop(sink);

    let content = fs::read_to_string(&path)?;
    assert_eq!(content.lines().count(), 4);
    assert_eq!(content.lines().filter(|l| l.starts_with("id,")).count(), 1);
    // a key outside the established columns is dropped
    assert!(!content.contains("ZED"));

    let mut reader = csv::Reader::from_path(&path)?;
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[1][0], "2");
    assert_eq!(&rows[1][1], "");
    Ok(())
}

#[tokio::test]
async fn append_adopts_header_of_existing_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    fs::write(&path, "id,name\n1,first\n")?;

    let mut sink = CsvRecordSink::append_to(&path)?;
    sink.write_batch(&[json!({"id": 2, "name": "second", "price": 99})])
        .await?;
    drop(sink);

    let mut reader = csv::Reader::from_path(&path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(headers, vec!["id", "name"]);

    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "first");
    assert_eq!(&rows[1][0], "2");
    assert_eq!(&rows[1][1], "second");
    Ok(())
}

#[tokio::test]
async fn create_truncates_previous_contents() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    fs::write(&path, "stale,header\nstale,row\n")?;

    let mut sink = CsvRecordSink::create(&path)?;
    sink.write_batch(&[json!({"id": 1})]).await?;
    drop(sink);

    let content = fs::read_to_string(&path)?;
    assert!(!content.contains("stale"));
    assert_eq!(content.lines().count(), 2);
    Ok(())
}

#[tokio::test]
async fn creates_missing_parent_directories() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("data").join("deep").join("out.csv");

    let mut sink = CsvRecordSink::append_to(&path)?;
    sink.write_batch(&[json!({"id": 1})]).await?;
    drop(sink);

    assert!(path.exists());
    Ok(())
}

#[test]
fn loads_products_deduplicated_and_reviewed() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("products.csv");
    fs::write(
        &path,
        "id,seller_id,seller_product_id,review_count,name\n\
         1,10,100,5,first\n\
         1,10,100,9,duplicate\n\
         2,20,200,0,unreviewed\n\
         2,20,200,7,duplicate-of-unreviewed\n\
         3,30,300,2,third\n",
    )?;

    let products = load_products(&path)?;

    assert_eq!(products.len(), 2);
    // the first occurrence wins, even when a later duplicate has reviews
    assert_eq!(products[0].id, "1");
    assert_eq!(products[0].review_count, 5);
    assert_eq!(products[1].id, "3");
    assert_eq!(products[1].seller_product_id, "300");
    Ok(())
}

#[test]
fn load_products_requires_key_columns() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("products.csv");
    fs::write(&path, "id,seller_product_id,review_count\n1,100,5\n")?;

    let err = load_products(&path).unwrap_err();
    assert!(matches!(err, ScraperError::MissingField(_)));
    Ok(())
}

#[test]
fn load_products_rejects_malformed_review_count() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("products.csv");
    fs::write(
        &path,
        "id,seller_id,seller_product_id,review_count\n1,10,100,lots\n",
    )?;

    let err = load_products(&path).unwrap_err();
    assert!(matches!(err, ScraperError::Api { .. }));
    Ok(())
}
