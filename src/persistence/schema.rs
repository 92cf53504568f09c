//! Logical schema for the learned-data store. Tables are additive only —
//! no migration framework is needed at this scale (spec's backward-
//! compatibility note in §6 of the design doc).

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    command TEXT PRIMARY KEY,
    total_usage_count INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_used TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS arguments (
    command TEXT NOT NULL,
    argument TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_used TEXT NOT NULL,
    is_flag INTEGER NOT NULL,
    PRIMARY KEY (command, argument)
);

CREATE TABLE IF NOT EXISTS flag_combinations (
    command TEXT NOT NULL,
    flags_key TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_used TEXT NOT NULL,
    PRIMARY KEY (command, flags_key)
);

CREATE TABLE IF NOT EXISTS argument_sequences (
    command TEXT NOT NULL,
    first_argument TEXT NOT NULL,
    second_argument TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_used TEXT NOT NULL,
    PRIMARY KEY (command, first_argument, second_argument)
);

CREATE TABLE IF NOT EXISTS parameter_values (
    command TEXT NOT NULL,
    parameter TEXT NOT NULL,
    value TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    last_used TEXT NOT NULL,
    PRIMARY KEY (command, parameter, value)
);

CREATE TABLE IF NOT EXISTS command_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL,
    command_line TEXT NOT NULL,
    arguments_json TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    success INTEGER NOT NULL,
    working_directory TEXT
);

CREATE TABLE IF NOT EXISTS command_sequences (
    prev_command TEXT NOT NULL,
    next_command TEXT NOT NULL,
    frequency INTEGER NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (prev_command, next_command)
);

CREATE TABLE IF NOT EXISTS workflow_transitions (
    from_command TEXT NOT NULL,
    to_command TEXT NOT NULL,
    frequency INTEGER NOT NULL,
    total_time_delta_ms INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_used TEXT NOT NULL,
    PRIMARY KEY (from_command, to_command)
);

CREATE TABLE IF NOT EXISTS co_occurrences (
    command TEXT NOT NULL,
    arg_a TEXT NOT NULL,
    arg_b TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    PRIMARY KEY (command, arg_a, arg_b)
);
"#;
