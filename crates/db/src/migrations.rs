//! Schema bootstrap.
//!
//! Creates the tables the engine reads and writes when they are missing.
//! Production deployments manage the schema out of band; this path exists
//! for development and the integration test suite.

use sqlx::MySqlPool;

use crate::error::DbError;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS `application` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(255) NOT NULL UNIQUE,
        `key` VARCHAR(64) NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS `mode` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(64) NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS `priority` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(64) NOT NULL UNIQUE,
        `mode_id` BIGINT NOT NULL,
        FOREIGN KEY (`mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_type` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(64) NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS `target` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(255) NOT NULL,
        `type_id` BIGINT NOT NULL,
        `active` BOOLEAN NOT NULL DEFAULT TRUE,
        UNIQUE KEY `target_name_type` (`name`, `type_id`),
        FOREIGN KEY (`type_id`) REFERENCES `target_type` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `user_team` (
        `user_id` BIGINT NOT NULL,
        `team_id` BIGINT NOT NULL,
        PRIMARY KEY (`user_id`, `team_id`),
        FOREIGN KEY (`user_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`team_id`) REFERENCES `target` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_role` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(64) NOT NULL UNIQUE,
        `type_id` BIGINT NOT NULL,
        FOREIGN KEY (`type_id`) REFERENCES `target_type` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_contact` (
        `target_id` BIGINT NOT NULL,
        `mode_id` BIGINT NOT NULL,
        `destination` VARCHAR(255) NOT NULL,
        PRIMARY KEY (`target_id`, `mode_id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_mode` (
        `target_id` BIGINT NOT NULL,
        `priority_id` BIGINT NOT NULL,
        `mode_id` BIGINT NOT NULL,
        PRIMARY KEY (`target_id`, `priority_id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`priority_id`) REFERENCES `priority` (`id`),
        FOREIGN KEY (`mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_application_mode` (
        `target_id` BIGINT NOT NULL,
        `application_id` BIGINT NOT NULL,
        `priority_id` BIGINT NOT NULL,
        `mode_id` BIGINT NOT NULL,
        PRIMARY KEY (`target_id`, `application_id`, `priority_id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`application_id`) REFERENCES `application` (`id`),
        FOREIGN KEY (`priority_id`) REFERENCES `priority` (`id`),
        FOREIGN KEY (`mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `target_reprioritization` (
        `target_id` BIGINT NOT NULL,
        `src_mode_id` BIGINT NOT NULL,
        `dst_mode_id` BIGINT NOT NULL,
        `count` SMALLINT UNSIGNED NOT NULL,
        `duration` INT UNSIGNED NOT NULL,
        PRIMARY KEY (`target_id`, `src_mode_id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`src_mode_id`) REFERENCES `mode` (`id`),
        FOREIGN KEY (`dst_mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `plan` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(255) NOT NULL,
        `description` TEXT,
        `creator` VARCHAR(255) NOT NULL,
        `created` DATETIME NOT NULL,
        `step_count` INT UNSIGNED NOT NULL,
        `threshold_window` BIGINT UNSIGNED NOT NULL,
        `threshold_count` BIGINT UNSIGNED NOT NULL,
        `aggregation_window` BIGINT UNSIGNED NOT NULL,
        `aggregation_reset` BIGINT UNSIGNED NOT NULL,
        `tracking_type` VARCHAR(64),
        `tracking_key` VARCHAR(255),
        `tracking_template` VARCHAR(255)
    )",
    "CREATE TABLE IF NOT EXISTS `plan_active` (
        `name` VARCHAR(255) NOT NULL PRIMARY KEY,
        `plan_id` BIGINT NOT NULL,
        FOREIGN KEY (`plan_id`) REFERENCES `plan` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `plan_notification` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `plan_id` BIGINT NOT NULL,
        `step` INT UNSIGNED NOT NULL,
        `priority_id` BIGINT NOT NULL,
        `target_id` BIGINT NOT NULL,
        `role_id` BIGINT NOT NULL,
        `template` VARCHAR(255) NOT NULL,
        `repeat` INT UNSIGNED NOT NULL DEFAULT 0,
        `wait` BIGINT UNSIGNED NOT NULL DEFAULT 0,
        FOREIGN KEY (`plan_id`) REFERENCES `plan` (`id`),
        FOREIGN KEY (`priority_id`) REFERENCES `priority` (`id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`role_id`) REFERENCES `target_role` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `incident` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `plan_id` BIGINT NOT NULL,
        `application_id` BIGINT NOT NULL,
        `context` TEXT NOT NULL,
        `created` DATETIME NOT NULL,
        `updated` DATETIME,
        `current_step` INT UNSIGNED NOT NULL DEFAULT 0,
        `active` BOOLEAN NOT NULL DEFAULT TRUE,
        `owner` VARCHAR(255),
        KEY `incident_active` (`active`, `current_step`),
        FOREIGN KEY (`plan_id`) REFERENCES `plan` (`id`),
        FOREIGN KEY (`application_id`) REFERENCES `application` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `template` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `name` VARCHAR(255) NOT NULL,
        `creator` VARCHAR(255) NOT NULL,
        `created` DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS `template_active` (
        `name` VARCHAR(255) NOT NULL PRIMARY KEY,
        `template_id` BIGINT NOT NULL,
        FOREIGN KEY (`template_id`) REFERENCES `template` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `template_content` (
        `template_id` BIGINT NOT NULL,
        `application_id` BIGINT NOT NULL,
        `mode_id` BIGINT NOT NULL,
        `subject` VARCHAR(255) NOT NULL,
        `body` TEXT NOT NULL,
        PRIMARY KEY (`template_id`, `application_id`, `mode_id`),
        FOREIGN KEY (`template_id`) REFERENCES `template` (`id`),
        FOREIGN KEY (`application_id`) REFERENCES `application` (`id`),
        FOREIGN KEY (`mode_id`) REFERENCES `mode` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `template_variable` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `application_id` BIGINT NOT NULL,
        `name` VARCHAR(255) NOT NULL,
        `required` BOOLEAN NOT NULL DEFAULT FALSE,
        FOREIGN KEY (`application_id`) REFERENCES `application` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `message` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `created` DATETIME NOT NULL,
        `incident_id` BIGINT,
        `plan_id` BIGINT,
        `plan_notification_id` BIGINT,
        `application_id` BIGINT NOT NULL,
        `target_id` BIGINT NOT NULL,
        `priority_id` BIGINT NOT NULL,
        `mode_id` BIGINT,
        `destination` VARCHAR(255),
        `subject` VARCHAR(255),
        `body` TEXT NOT NULL,
        `template_id` BIGINT,
        `sent` DATETIME,
        `active` BOOLEAN NOT NULL DEFAULT TRUE,
        `batch` VARCHAR(32),
        KEY `message_active` (`active`),
        KEY `message_incident` (`incident_id`),
        FOREIGN KEY (`application_id`) REFERENCES `application` (`id`),
        FOREIGN KEY (`target_id`) REFERENCES `target` (`id`),
        FOREIGN KEY (`priority_id`) REFERENCES `priority` (`id`)
    )",
    "CREATE TABLE IF NOT EXISTS `message_changelog` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `date` DATETIME NOT NULL,
        `message_id` BIGINT NOT NULL,
        `change_type` VARCHAR(64) NOT NULL,
        `old` VARCHAR(255),
        `new` VARCHAR(255),
        `description` TEXT,
        KEY `changelog_message` (`message_id`),
        KEY `changelog_date` (`date`)
    )",
    "CREATE TABLE IF NOT EXISTS `response` (
        `id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        `message_id` BIGINT NOT NULL,
        `source` VARCHAR(64) NOT NULL,
        `content` TEXT,
        `created` DATETIME NOT NULL,
        FOREIGN KEY (`message_id`) REFERENCES `message` (`id`)
    )",
];

/// Run every `CREATE TABLE IF NOT EXISTS` statement.
pub async fn run_migrations(pool: &MySqlPool) -> Result<(), DbError> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
