use busline_inventory::SeatInventoryCoordinator;
use busline_ledger::BookingLedger;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BookingLedger>,
    pub inventory: Arc<SeatInventoryCoordinator>,
}
