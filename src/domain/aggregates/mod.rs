//! Aggregates module
pub mod system;
pub mod product;
pub mod user;
pub mod discount;
pub mod location;
pub mod basket;
pub mod order;
pub mod refund;

pub use system::{IntegratedSystem, SystemError};
pub use product::{Product, ProductChanges, ProductError, ProductVersion};
pub use user::{User, UserInfo};
pub use discount::{best_discount, BasketScope, Discount, DiscountError, DiscountScope, DiscountType, PaymentType, RedeemedDiscount, RedemptionCounts, RedemptionType};
pub use location::{BlockedCountry, CustomerLocation, CustomerLocationMetadata, FlagKind, GeolocationType, NetBlock, TaxRate};
pub use basket::{Basket, BasketError, BasketItem};
pub use order::{decode_reference_number, Line, Order, OrderError, OrderState, PaymentData, RefundRecord, Transaction, TransactionType};
pub use refund::{LineApproval, RefundCodeType, RefundError, RefundRequest, RefundStatus, RequestLine, RequestProcessingCode, RequestRecipient};
