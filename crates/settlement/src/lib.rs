//! `majolica-settlement` — payment receipts, partial installments and
//! contact general receipts.
//!
//! A [`PaymentReceipt`] is an obligation owed to a counterparty, created
//! before any cash moves and settled over time by installments. Each
//! installment converts at **its own** exchange rate, so the base-currency
//! total actually drawn from treasuries can diverge from the receipt's
//! nominal base total when rates move between installments; both figures are
//! kept (`base_total` vs `base_paid`).

pub mod general_receipt;
pub mod receipt;

pub use general_receipt::{
    GeneralReceipt, GeneralReceiptCommand, GeneralReceiptEvent, GeneralReceiptId,
    GeneralReceiptKind, GeneralReceiptRecorded, RecordGeneralReceipt,
};
pub use receipt::{
    AddInstallment, CancelReceipt, CreateReceipt, InstallmentAdded, InstallmentId, PaymentMethod,
    PaymentInstallment, PaymentReceipt, PurchaseId, ReceiptCancelled, ReceiptCommand,
    ReceiptCreated, ReceiptEvent, ReceiptId, ReceiptKind, ReceiptSettled, ReceiptStatus,
};
