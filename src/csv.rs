use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::AmountError;
use crate::engine::{AdminOverrideRequest, Command, ConfirmRequest, ReceiptRequest};
use crate::model::{
    DonationId, DonationStatus, NewDonation, Owner, StatusError, UserAggregate, UserId,
};
use crate::webhook::WebhookPayload;

/// Errors that can occur when reading command rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: String,
        field: &'static str,
    },

    #[error("line {line}: bad amount: {source}")]
    Amount { line: usize, source: AmountError },

    #[error("line {line}: bad status: {source}")]
    Status { line: usize, source: StatusError },
}

/// One input row. Which columns matter depends on `type`:
///
/// | type      | columns                                          |
/// |-----------|--------------------------------------------------|
/// | donate    | donation, user, amount, status                   |
/// | item      | user                                             |
/// | confirm   | donation, amount, auth                           |
/// | verify    | donation, receipt, amount, date, auth            |
/// | admin     | donation, status, reason, amount, auth           |
/// | webhook   | donation, status, amount, receipt, date, auth    |
/// | reconcile | user, auth                                       |
///
/// For webhooks `auth` carries the shared secret, otherwise a bearer token.
#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    donation: Option<String>,
    user: Option<String>,
    amount: Option<String>,
    status: Option<String>,
    receipt: Option<String>,
    date: Option<String>,
    reason: Option<String>,
    auth: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    total_donated: String,
    items_donated: u64,
}

/// Read commands from a csv file
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

impl InputRow {
    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let kind = self.r#type.clone();
        let missing = |field| CsvError::MissingField {
            line,
            kind: kind.clone(),
            field,
        };
        let amount = match &self.amount {
            Some(raw) => Some(
                raw.parse::<Amount>()
                    .map_err(|source| CsvError::Amount { line, source })?,
            ),
            None => None,
        };

        match kind.as_str() {
            "donate" => {
                let status = match &self.status {
                    Some(raw) => raw
                        .parse::<DonationStatus>()
                        .map_err(|source| CsvError::Status { line, source })?,
                    None => DonationStatus::Pending,
                };
                Ok(Command::Donate(NewDonation {
                    id: DonationId::new(self.donation.ok_or_else(|| missing("donation"))?),
                    owner: Owner::from_raw(self.user.ok_or_else(|| missing("user"))?),
                    amount: amount.ok_or_else(|| missing("amount"))?,
                    status,
                }))
            }
            "item" => Ok(Command::DonateItem {
                owner: Owner::from_raw(self.user.ok_or_else(|| missing("user"))?),
            }),
            "confirm" => Ok(Command::Confirm(ConfirmRequest {
                donation_id: self.donation.ok_or_else(|| missing("donation"))?,
                amount,
                token: self.auth,
            })),
            "verify" => Ok(Command::VerifyReceipt(ReceiptRequest {
                donation_id: self.donation.ok_or_else(|| missing("donation"))?,
                receipt_number: self.receipt.ok_or_else(|| missing("receipt"))?,
                amount,
                donation_date: self.date,
                token: self.auth,
            })),
            "admin" => Ok(Command::AdminOverride(AdminOverrideRequest {
                donation_id: self.donation.ok_or_else(|| missing("donation"))?,
                status: self.status.ok_or_else(|| missing("status"))?,
                reason: self.reason,
                amount,
                token: self.auth,
            })),
            "webhook" => Ok(Command::Webhook {
                secret: self.auth,
                payload: WebhookPayload {
                    external_id: self.donation.ok_or_else(|| missing("donation"))?,
                    status: self.status.ok_or_else(|| missing("status"))?,
                    amount,
                    receipt_number: self.receipt,
                    donation_date: self.date,
                },
            }),
            "reconcile" => Ok(Command::Reconcile {
                user: UserId::new(self.user.ok_or_else(|| missing("user"))?),
                token: self.auth,
            }),
            other => Err(CsvError::UnrecognizedType {
                line,
                kind: other.to_string(),
            }),
        }
    }
}

/// Write user aggregates in csv format
pub fn write_aggregates(
    writer: impl io::Write,
    aggregates: impl IntoIterator<Item = UserAggregate>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for aggregate in aggregates {
        writer.serialize(OutputRow {
            user: aggregate.user,
            total_donated: aggregate.total_donated.to_string(),
            items_donated: aggregate.items_donated,
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "type,donation,user,amount,status,receipt,date,reason,auth\n";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read(rows: &str) -> Vec<Result<Command, CsvError>> {
        let file = write_csv(rows);
        read_commands(file.path()).unwrap().collect()
    }

    #[test]
    fn read_donate() {
        let mut results = read("donate,d1,u1,10.5,,,,,\ndonate,d2,anonymous,3,COMPLETED,,,,\n");
        assert_eq!(results.len(), 2);

        match results.remove(0).unwrap() {
            Command::Donate(new) => {
                assert_eq!(new.id, DonationId::new("d1"));
                assert_eq!(new.owner, Owner::from_raw("u1"));
                assert_eq!(new.amount, Amount::from_scaled(105_000));
                assert_eq!(new.status, DonationStatus::Pending);
            }
            other => panic!("expected donate, got {other:?}"),
        }
        match results.remove(0).unwrap() {
            Command::Donate(new) => {
                assert_eq!(new.owner, Owner::Anonymous);
                assert_eq!(new.status, DonationStatus::Completed);
            }
            other => panic!("expected donate, got {other:?}"),
        }
    }

    #[test]
    fn read_confirm_with_token() {
        let results = read("confirm, d1, , , , , , , tok-u1\n");
        match results.into_iter().next().unwrap().unwrap() {
            Command::Confirm(request) => {
                assert_eq!(request.donation_id, "d1");
                assert_eq!(request.amount, None);
                assert_eq!(request.token.as_deref(), Some("tok-u1"));
            }
            other => panic!("expected confirm, got {other:?}"),
        }
    }

    #[test]
    fn read_webhook_uses_auth_as_secret() {
        let results = read("webhook,d3,,75.00,completed,R123,2024-05-01,,hush\n");
        match results.into_iter().next().unwrap().unwrap() {
            Command::Webhook { secret, payload } => {
                assert_eq!(secret.as_deref(), Some("hush"));
                assert_eq!(payload.external_id, "d3");
                assert_eq!(payload.amount, Some(Amount::from_units(75)));
                assert_eq!(payload.receipt_number.as_deref(), Some("R123"));
                assert_eq!(payload.donation_date.as_deref(), Some("2024-05-01"));
            }
            other => panic!("expected webhook, got {other:?}"),
        }
    }

    #[test]
    fn read_admin_keeps_raw_status() {
        let results = read("admin,d1,,,bogus,,,typo,tok-admin\n");
        match results.into_iter().next().unwrap().unwrap() {
            Command::AdminOverride(request) => {
                assert_eq!(request.status, "bogus");
                assert_eq!(request.reason.as_deref(), Some("typo"));
            }
            other => panic!("expected admin override, got {other:?}"),
        }
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read("refund,d1,,,,,,,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_fields() {
        let results = read("donate,d1,u1,,,,,,\nverify,d1,,,,,,,tok\n");
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::MissingField {
                line: 2,
                field: "amount",
                ..
            }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            CsvError::MissingField {
                line: 3,
                field: "receipt",
                ..
            }
        ));
    }

    #[test]
    fn read_returns_error_for_bad_values() {
        let results = read("donate,d1,u1,ten,,,,,\ndonate,d1,u1,1,done,,,,\n");
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::Amount { line: 2, .. }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            CsvError::Status { line: 3, .. }
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = read_commands("/definitely/not/here.csv");
        assert!(matches!(result, Err(CsvError::Open { .. })));
    }

    #[test]
    fn writes_aggregates() {
        let mut u1 = UserAggregate::new(UserId::new("u1"));
        u1.total_donated = Amount::from_scaled(1_005_000);
        u1.items_donated = 2;

        let mut out = Vec::new();
        write_aggregates(&mut out, [u1, UserAggregate::new(UserId::new("u2"))]).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "user,total_donated,items_donated\nu1,100.5000,2\nu2,0.0000,0\n"
        );
    }
}
