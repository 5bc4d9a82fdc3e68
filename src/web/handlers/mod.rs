pub mod crop;
pub mod history;
pub mod pest;
pub mod users;
