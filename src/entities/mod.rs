pub mod goods_receipt;
pub mod goods_receipt_line;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_line;
pub mod stock_adjustment;
pub mod stock_movement;
