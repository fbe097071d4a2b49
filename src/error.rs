use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("DBus connection error")]
    Dbus(#[from] zbus::Error),
    #[error("service address {0:?} was not understood")]
    Address(String),
    #[error("malformed menu layout: {0}")]
    Layout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
