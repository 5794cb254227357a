//! CRM deal mapping and find-or-create upsert
//!
//! The deal is described by a typed `DealFields`; `to_wire` is the only place
//! that knows the provider's field names.

use std::sync::Arc;

use base64::Engine;
use dossier_common::config::CrmFieldMap;
use dossier_common::crm::{CrmClient, CrmError, ItemFilter};
use dossier_common::db::{DocumentNature, Submission, SubmissionType};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use crate::uploader::SubmittedFile;

const UNKNOWN_SUBJECT: &str = "Unknown";

/// A file attached to the deal as `[file name, base64 content]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_base64: String,
}

impl Attachment {
    pub fn encode(file: &SubmittedFile) -> Self {
        Self {
            file_name: file.name.clone(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(&file.bytes),
        }
    }

    fn to_wire(&self) -> Value {
        json!([self.file_name, self.content_base64])
    }
}

/// Exactly one attachment bucket is populated, chosen by document nature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachments {
    Translated(Vec<Attachment>),
    Apostilled(Vec<Attachment>),
    PlainScanned(Vec<Attachment>),
}

impl Attachments {
    /// Pick the bucket for `nature`.
    ///
    /// Plain scans whose estimated decoded size exceeds `max_bytes` are
    /// dropped; translated and apostilled files are always attached.
    pub fn for_nature(nature: DocumentNature, attachments: Vec<Attachment>, max_bytes: u64) -> Self {
        match nature {
            DocumentNature::Translated => Attachments::Translated(attachments),
            DocumentNature::Apostilled => Attachments::Apostilled(attachments),
            DocumentNature::Plain => {
                let estimated = estimated_decoded_bytes(&attachments);
                if estimated > max_bytes as f64 {
                    warn!(
                        estimated_bytes = estimated as u64,
                        max_bytes = max_bytes,
                        "Scanned attachments too large, sending without them"
                    );
                    Attachments::PlainScanned(Vec::new())
                } else {
                    Attachments::PlainScanned(attachments)
                }
            }
        }
    }
}

/// Decoded size estimate of base64 payloads: three bytes per four characters
pub fn estimated_decoded_bytes(attachments: &[Attachment]) -> f64 {
    let encoded: usize = attachments.iter().map(|a| a.content_base64.len()).sum();
    0.75 * encoded as f64
}

/// Everything written to a deal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealFields {
    pub title: String,
    pub applicant_id: String,
    pub family_id: String,
    pub file_urls: Vec<String>,
    pub submitted_by: u64,
    pub attachments: Attachments,
}

/// How an existing deal for a submission is recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    pub scope: SubmissionType,
    pub id: String,
    pub title: String,
}

/// `"{subject} - {documentType}"`, subject being the applicant or family
pub fn deal_title(submission: &Submission) -> String {
    let (name, id) = match submission.kind() {
        SubmissionType::Applicant => (&submission.applicant_name, &submission.applicant_id),
        SubmissionType::Family => (&submission.family_name, &submission.family_id),
    };

    let subject = [name, id]
        .into_iter()
        .filter_map(|value| value.as_deref().map(str::trim))
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_SUBJECT);

    format!("{} - {}", subject, submission.document_type)
}

pub fn natural_key(submission: &Submission) -> NaturalKey {
    let scope = submission.kind();
    let id = match scope {
        SubmissionType::Applicant => submission.applicant_id.clone(),
        SubmissionType::Family => submission.family_id.clone(),
    };

    NaturalKey {
        scope,
        id: id.unwrap_or_default(),
        title: deal_title(submission),
    }
}

pub fn build_deal_fields(
    submission: &Submission,
    file_urls: Vec<String>,
    files: &[SubmittedFile],
    max_attachment_bytes: u64,
) -> DealFields {
    let attachments = files.iter().map(Attachment::encode).collect();

    DealFields {
        title: deal_title(submission),
        applicant_id: submission.applicant_id.clone().unwrap_or_default(),
        family_id: submission.family_id.clone().unwrap_or_default(),
        file_urls,
        submitted_by: submission.user_id.trim().parse().unwrap_or(0),
        attachments: Attachments::for_nature(submission.nature(), attachments, max_attachment_bytes),
    }
}

/// Render deal fields with the provider's field names.
///
/// All three attachment keys are always present; inactive ones are empty.
pub fn to_wire(fields: &DealFields, names: &CrmFieldMap) -> Value {
    let bucket = |attachments: &[Attachment]| -> Value {
        Value::Array(attachments.iter().map(Attachment::to_wire).collect())
    };
    let empty = Value::Array(Vec::new());

    let (translated, apostilled, scanned) = match &fields.attachments {
        Attachments::Translated(files) => (bucket(files), empty.clone(), empty),
        Attachments::Apostilled(files) => (empty.clone(), bucket(files), empty),
        Attachments::PlainScanned(files) => (empty.clone(), empty, bucket(files)),
    };

    let mut wire = Map::new();
    wire.insert(names.title.clone(), json!(fields.title));
    wire.insert(names.applicant_id.clone(), json!(fields.applicant_id));
    wire.insert(names.family_id.clone(), json!(fields.family_id));
    wire.insert(names.file_urls.clone(), json!(fields.file_urls));
    wire.insert(names.submitted_by.clone(), json!(fields.submitted_by));
    wire.insert(names.translated_files.clone(), translated);
    wire.insert(names.apostilled_files.clone(), apostilled);
    wire.insert(names.scanned_files.clone(), scanned);
    Value::Object(wire)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub deal_id: String,
    pub was_updated: bool,
}

/// Find-or-create of a deal by natural key
pub struct DealUpserter {
    crm: Arc<dyn CrmClient>,
    names: CrmFieldMap,
}

impl DealUpserter {
    pub fn new(crm: Arc<dyn CrmClient>, names: CrmFieldMap) -> Self {
        Self { crm, names }
    }

    fn filter_for(&self, key: &NaturalKey) -> ItemFilter {
        let id_field = match key.scope {
            SubmissionType::Applicant => &self.names.applicant_id,
            SubmissionType::Family => &self.names.family_id,
        };

        ItemFilter::new()
            .eq(id_field.clone(), key.id.clone())
            .eq(self.names.title.clone(), key.title.clone())
    }

    /// Update the first deal matching `key`, or create one
    #[instrument(skip(self, deal), fields(title = %key.title))]
    pub async fn upsert_deal(
        &self,
        key: &NaturalKey,
        deal: &DealFields,
    ) -> Result<UpsertOutcome, CrmError> {
        let payload = to_wire(deal, &self.names);
        let existing = self.crm.item_list(&self.filter_for(key)).await?;

        match existing.into_iter().next() {
            Some(item) => {
                self.crm.item_update(&item.id, &payload).await?;
                info!(deal_id = %item.id, "Deal updated");
                Ok(UpsertOutcome {
                    deal_id: item.id,
                    was_updated: true,
                })
            }
            None => {
                let deal_id = self.crm.item_add(&payload).await?;
                info!(deal_id = %deal_id, "Deal created");
                Ok(UpsertOutcome {
                    deal_id,
                    was_updated: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dossier_common::crm::{CrmCall, InMemoryCrm};
    use uuid::Uuid;

    fn submission(kind: SubmissionType, nature: Option<&str>) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            user_id: "42".into(),
            location: "Lisbon".into(),
            submission_type: kind.as_str().into(),
            document_type: "Passport".into(),
            document_nature: nature.map(str::to_string),
            family_id: Some("F-1".into()),
            family_name: Some("Silva".into()),
            applicant_id: Some("A-7".into()),
            applicant_name: Some("Ana Silva".into()),
            file_urls: json!([]),
            status: "CREATING_DEAL".into(),
            status_details: "Sending to CRM".into(),
            crm_deal_id: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn attachment(len: usize) -> Attachment {
        Attachment {
            file_name: "scan.pdf".into(),
            content_base64: "A".repeat(len),
        }
    }

    #[test]
    fn test_title_subject_by_scope() {
        let applicant = submission(SubmissionType::Applicant, None);
        assert_eq!(deal_title(&applicant), "Ana Silva - Passport");

        let family = submission(SubmissionType::Family, None);
        assert_eq!(deal_title(&family), "Silva - Passport");
    }

    #[test]
    fn test_title_falls_back_to_id_then_unknown() {
        let mut record = submission(SubmissionType::Applicant, None);
        record.applicant_name = Some("  ".into());
        assert_eq!(deal_title(&record), "A-7 - Passport");

        record.applicant_id = None;
        assert_eq!(deal_title(&record), "Unknown - Passport");
    }

    #[test]
    fn test_natural_key_scope() {
        let key = natural_key(&submission(SubmissionType::Family, None));
        assert_eq!(key.id, "F-1");
        assert_eq!(key.scope, SubmissionType::Family);

        let key = natural_key(&submission(SubmissionType::Applicant, None));
        assert_eq!(key.id, "A-7");
    }

    #[test]
    fn test_size_guard_drops_large_scans() {
        // 4_000_004 base64 chars decode to ~3_000_003 bytes
        let attachments = vec![attachment(2_000_002), attachment(2_000_002)];
        assert!(estimated_decoded_bytes(&attachments) > 3_000_000.0);

        let bucket =
            Attachments::for_nature(DocumentNature::Plain, attachments.clone(), 3_000_000);
        assert_eq!(bucket, Attachments::PlainScanned(Vec::new()));

        let bucket =
            Attachments::for_nature(DocumentNature::Translated, attachments.clone(), 3_000_000);
        assert_eq!(bucket, Attachments::Translated(attachments.clone()));

        let bucket =
            Attachments::for_nature(DocumentNature::Apostilled, attachments.clone(), 3_000_000);
        assert_eq!(bucket, Attachments::Apostilled(attachments));
    }

    #[test]
    fn test_size_guard_keeps_small_scans() {
        let attachments = vec![attachment(4_000_000)];
        let bucket = Attachments::for_nature(DocumentNature::Plain, attachments.clone(), 3_000_000);
        assert_eq!(bucket, Attachments::PlainScanned(attachments));
    }

    #[test]
    fn test_wire_payload_has_every_bucket() {
        let files = vec![SubmittedFile::pdf("a.pdf", b"%PDF".to_vec())];
        let fields = build_deal_fields(
            &submission(SubmissionType::Applicant, Some("apostilled")),
            vec!["https://drive/a".into()],
            &files,
            3_000_000,
        );
        let names = CrmFieldMap::default();
        let wire = to_wire(&fields, &names);

        assert_eq!(wire[&names.title], "Ana Silva - Passport");
        assert_eq!(wire[&names.applicant_id], "A-7");
        assert_eq!(wire[&names.family_id], "F-1");
        assert_eq!(wire[&names.submitted_by], 42);
        assert_eq!(wire[&names.file_urls], json!(["https://drive/a"]));
        assert_eq!(wire[&names.apostilled_files], json!([["a.pdf", "JVBERg=="]]));
        assert_eq!(wire[&names.translated_files], json!([]));
        assert_eq!(wire[&names.scanned_files], json!([]));
    }

    #[test]
    fn test_non_numeric_user_is_zero() {
        let mut record = submission(SubmissionType::Family, None);
        record.user_id = "user-42".into();
        let fields = build_deal_fields(&record, Vec::new(), &[], 3_000_000);
        assert_eq!(fields.submitted_by, 0);
        assert_eq!(fields.attachments, Attachments::PlainScanned(Vec::new()));
    }

    #[tokio::test]
    async fn test_existing_deal_is_updated() {
        let crm = Arc::new(InMemoryCrm::new());
        let names = CrmFieldMap::default();
        let record = submission(SubmissionType::Applicant, None);
        let existing = crm
            .insert(json!({ (names.applicant_id.clone()): "A-7", (names.title.clone()): "Ana Silva - Passport" }))
            .await;

        let upserter = DealUpserter::new(crm.clone(), names);
        let fields = build_deal_fields(&record, vec!["https://drive/1".into()], &[], 3_000_000);
        let outcome = upserter.upsert_deal(&natural_key(&record), &fields).await.unwrap();

        assert_eq!(
            outcome,
            UpsertOutcome {
                deal_id: existing.clone(),
                was_updated: true
            }
        );
        assert_eq!(crm.item_count().await, 1);
        assert!(matches!(crm.calls().await[1], CrmCall::Update { ref id, .. } if *id == existing));
    }

    #[test]
    fn test_missing_deal_is_created() {
        let crm = Arc::new(InMemoryCrm::new());
        let record = submission(SubmissionType::Family, None);
        let upserter = DealUpserter::new(crm.clone(), CrmFieldMap::default());
        let fields = build_deal_fields(&record, Vec::new(), &[], 3_000_000);

        let outcome =
            tokio_test::block_on(upserter.upsert_deal(&natural_key(&record), &fields)).unwrap();

        assert!(!outcome.was_updated);
        let calls = tokio_test::block_on(crm.calls());
        assert!(matches!(calls[0], CrmCall::List(_)));
        assert!(matches!(calls[1], CrmCall::Add { .. }));
    }
}
