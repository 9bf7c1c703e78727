mod journal;
mod sessions;
