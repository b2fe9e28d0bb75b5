//! `majolica-fx` — currency codes, exchange rates and base-currency conversion.
//!
//! Pure value types, no state. Treasury balances are always denominated in
//! the configured base currency; receipts may be denominated in a foreign
//! currency and converted at a validated [`ExchangeRate`].

pub mod currency;
pub mod rate;

pub use currency::CurrencyCode;
pub use rate::{ExchangeRate, to_base};
