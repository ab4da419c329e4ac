mod dispatch;
mod state_machine;
