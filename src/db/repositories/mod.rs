mod control_pauses;
mod sessions;
