mod categories;
mod resume;
mod support;
