// src/trigger.rs

use crate::analysis::DocumentRef;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Object keys in notifications are form-encoded: spaces arrive as `+`.
pub fn decode_object_key(raw: &str) -> Result<String, Box<dyn std::error::Error>> {
    let plus_decoded = raw.replace('+', " ");
    Ok(urlencoding::decode(&plus_decoded)?.into_owned())
}

/// Turn an object-created notification into the documents it names.
pub fn documents_from_event(json: &str) -> Result<Vec<DocumentRef>, Box<dyn std::error::Error>> {
    let notification: Notification = serde_json::from_str(json)?;
    if notification.records.is_empty() {
        return Err("notification has no records".into());
    }

    let mut documents = Vec::with_capacity(notification.records.len());
    for record in notification.records {
        let key = decode_object_key(&record.s3.object.key)?;
        info!(bucket = %record.s3.bucket.name, key = %key, "Document from event");
        documents.push(DocumentRef::new(record.s3.bucket.name, key));
    }
    Ok(documents)
}
