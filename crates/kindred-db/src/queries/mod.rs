mod groups;
mod matches;
mod notes;
mod private;
mod reactions;
mod sweep;
mod users;
