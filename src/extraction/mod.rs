pub mod ocr;
pub mod receipt;

pub use ocr::{TextExtractor, TextractExtractor};
pub use receipt::{FinancialData, OpenAiReceiptParser, ReceiptParser};
