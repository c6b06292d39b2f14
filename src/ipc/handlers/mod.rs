pub mod approvals;
pub mod backup_exchange;
pub mod committees;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod examiners;
pub mod marks;
pub mod reports;
pub mod semesters;
pub mod students;
pub mod teachers;
