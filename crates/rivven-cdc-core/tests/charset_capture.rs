//! Column values decode identically in the snapshot and streaming phases

mod harness;

use harness::*;
use pretty_assertions::assert_eq;
use rivven_cdc_core::common::{
    ColumnDescription, MemoryDatabase, QueryHookPoint, RawRow, RawValue, TableDescription,
};
use rivven_cdc_core::{CdcError, Charset, TableId};
use serde_json::Value;
use std::sync::Arc;

const SAMPLES: &[(&str, &str)] = &[
    ("utf8mb4", "héllo wörld 日本語 🚀"),
    ("utf8", "naïve résumé"),
    ("ucs2", "Ωmega ü ж"),
    ("utf16", "surrogates 🚀 ok"),
    ("utf16le", "little ĕndian"),
    ("latin1", "café crème"),
    ("latin2", "Łódź"),
    ("greek", "Καλημέρα"),
    ("hebrew", "שלום"),
    ("cp1251", "Привет"),
    ("cp1256", "مرحبا"),
    ("koi8r", "Привет мир"),
    ("tis620", "สวัสดี"),
    ("sjis", "日本語テキスト"),
    ("cp932", "ｶﾀｶﾅ"),
    ("ujis", "ひらがな"),
    ("euckr", "한국어"),
    ("gbk", "中文字符测试"),
    ("gb2312", "简体中文"),
    ("gb18030", "中文 €"),
    ("big5", "繁體中文"),
];

fn row(charset: Charset, id: i64, text: &str) -> RawRow {
    RawRow::new(vec![RawValue::Int(id), RawValue::Bytes(charset.encode(text).unwrap())])
}

fn name_of(event: &rivven_cdc_core::ChangeEvent) -> Value {
    event.row.get("name").cloned().unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_snapshot_and_streaming_decode_alike() {
    init_test_logging();
    for &(declared, text) in SAMPLES {
        let charset = Charset::from_mysql_name(declared).unwrap();
        let db = Arc::new(MemoryDatabase::new());
        db.create_table(users_table(declared)).unwrap();
        db.insert(&users(), row(charset, 1, text)).unwrap();

        // Inserted inside the chunk's watermark window, so it reaches the
        // snapshot only through the merge
        db.on_query(None, QueryHookPoint::AfterRead, move |db| {
            db.insert(&users(), row(charset, 2, text)).map(|_| ())
        });

        let mut capture = scheduler(&db, test_config().build().unwrap())
            .start(&users())
            .await
            .unwrap();
        let (snapshot, _) = read_snapshot(&mut capture).await;
        assert_eq!(snapshot.ids(), vec![1, 2], "charset {}", declared);

        db.insert(&users(), row(charset, 3, text)).unwrap();
        let streaming = read_changes(&mut capture, 1).await;

        let expected = Value::String(text.to_string());
        for event in snapshot.iter().chain(streaming.iter()) {
            assert_eq!(name_of(event), expected, "charset {} event {}", declared, event);
        }
        capture.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_binary_columns_render_as_base64() {
    let table = TableId::new("shop", "blobs");
    let db = Arc::new(MemoryDatabase::new());
    db.create_table(TableDescription {
        id: table.clone(),
        columns: vec![
            ColumnDescription::integer("id"),
            ColumnDescription::binary("payload"),
        ],
        primary_key: vec!["id".into()],
    })
    .unwrap();
    db.insert(
        &table,
        RawRow::new(vec![RawValue::Int(1), RawValue::Bytes(vec![0xff, 0x00, 0x10])]),
    )
    .unwrap();
    db.insert(&table, RawRow::new(vec![RawValue::Int(2), RawValue::Null]))
        .unwrap();

    let mut capture = scheduler(&db, test_config().build().unwrap())
        .start(&table)
        .await
        .unwrap();
    let (snapshot, _) = read_snapshot(&mut capture).await;
    assert_eq!(snapshot.notation(), vec!["+I[1, /wAQ]", "+I[2, null]"]);
}

#[tokio::test]
async fn test_invalid_bytes_fail_the_capture_with_decode_error() {
    let db = Arc::new(MemoryDatabase::new());
    db.create_table(users_table("ascii")).unwrap();
    db.insert(
        &users(),
        RawRow::new(vec![RawValue::Int(1), RawValue::Bytes(vec![b'o', b'k', 0xe9])]),
    )
    .unwrap();

    let capture = scheduler(&db, test_config().build().unwrap())
        .start(&users())
        .await
        .unwrap();
    let err = capture.join().await.unwrap_err();
    assert!(
        matches!(err, CdcError::Decode { ref charset, .. } if charset == "ascii"),
        "unexpected error {:?}",
        err
    );
    // Decode errors are data errors; no chunk retry
    assert_eq!(db.queries_run(), 1);
}
