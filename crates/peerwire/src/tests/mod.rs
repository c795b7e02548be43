
mod session;
