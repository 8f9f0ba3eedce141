//! Database models for the settlement ledger.

pub mod customer;
pub mod email_log;
pub mod gift_card;
pub mod gift_card_ledger;
pub mod gift_card_reservation;
pub mod locale;
pub mod order;
pub mod order_event;
pub mod order_item;
pub mod processed_event;
pub mod product;

pub use customer::{Customer, NewCustomer};
pub use email_log::{EmailLog, EmailStatus};
pub use gift_card::{GiftCard, GiftCardStatus, NewGiftCard};
pub use gift_card_ledger::{GiftCardEntryType, GiftCardLedgerEntry, NewGiftCardLedgerEntry};
pub use gift_card_reservation::{GiftCardReservation, ReservationStatus};
pub use locale::Locale;
pub use order::{NewOrder, Order, OrderStatus, TransitionCheck, TransitionError};
pub use order_event::{NewOrderEvent, OrderEvent};
pub use order_item::{NewOrderItem, OrderItem, OrderItemKind};
pub use processed_event::{ProcessedEvent, ProcessedEventStatus};
pub use product::Product;
