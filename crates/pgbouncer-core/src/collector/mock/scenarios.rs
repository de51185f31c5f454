//! Canned `psql -A -0` output of the PgBouncer admin console.
//!
//! Rows end in NUL bytes and fields are separated the way the collector
//! requests it for each command. The client listing carries an application name with
//! an embedded line break to exercise the sanitizer.

use super::runner::MockRunner;

pub const CLIENTS_OUTPUT: &[u8] = b"\
type;user;database;state;addr;port;local_addr;local_port;connect_time;request_time;wait;wait_us;close_needed;ptr;link;remote_pid;tls;application_name\0\
C;app;appdb;active;10.0.0.5;50312;10.0.0.1;6432;2024-05-01 10:00:00 UTC;2024-05-01 10:00:05 UTC;0;0;0;0x1;0x2;0;;billing\0\
C;report;appdb;idle;10.0.0.6;50313;10.0.0.1;6432;2024-05-01 10:00:00 UTC;2024-05-01 10:00:05 UTC;0;0;0;0x3;;0;;nightly\nreport\0";

pub const POOLS_OUTPUT: &[u8] = b"\
database;user;cl_active;cl_waiting;cl_active_cancel_req;cl_waiting_cancel_req;sv_active;sv_active_cancel;sv_being_canceled;sv_idle;sv_used;sv_tested;sv_login;maxwait;maxwait_us;pool_mode\0\
appdb;app;12;3;0;0;8;0;0;2;1;0;0;6;6000000;transaction\0\
appdb;report;1;0;0;0;1;0;0;0;0;0;0;0;120000;session\0\
pgbouncer;pgbouncer;1;0;0;0;0;0;0;0;0;0;0;0;0;statement\0";

pub const DATABASES_OUTPUT: &[u8] = b"\
name;host;port;database;force_user;pool_size;min_pool_size;reserve_pool;pool_mode;max_connections;current_connections;paused;disabled\0\
appdb;10.0.0.10;5432;appdb;;20;0;5;transaction;0;45;0;0\0\
reporting;10.0.0.11;5432;reporting;;20;0;5;session;100;45;0;0\0\
pgbouncer;;6432;pgbouncer;pgbouncer;2;0;0;statement;0;0;0;0\0";

/// `SHOW CONFIG;` is requested with a blank field separator.
pub const CONFIG_OUTPUT: &[u8] = b"\
listen_port 6432 6432 no\0\
max_client_conn 400 100 yes\0\
max_db_connections 0 0 yes\0\
default_pool_size 20 20 yes\0\
max_user_connections 0 0 yes\0";

pub const VERSION_OUTPUT: &[u8] = b"PgBouncer 1.21.0\0";

impl MockRunner {
    /// A runner whose instance on `port` answers every admin command.
    pub fn healthy_instance(self, port: &str) -> Self {
        let port = format!("-p {port}");
        self.respond(&[&port, "SHOW CLIENTS;"], CLIENTS_OUTPUT)
            .respond(&[&port, "SHOW POOLS;"], POOLS_OUTPUT)
            .respond(&[&port, "SHOW DATABASES;"], DATABASES_OUTPUT)
            .respond(&[&port, "SHOW CONFIG;"], CONFIG_OUTPUT)
            .respond(&[&port, "SHOW VERSION;"], VERSION_OUTPUT)
    }
}
