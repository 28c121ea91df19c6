pub mod index_list;

#[cfg(test)]
pub fn assert_send_sync<T: ?Sized + Send + Sync>() {}
#[cfg(test)]
pub fn assert_send<T: ?Sized + Send>() {}
