//! IMAP session state machine.
//!
//! One session per connection. The connection loop feeds complete lines
//! in and writes the returned bytes out; anything that needs the loop's
//! cooperation (literal collection, TLS upgrade, disconnect) comes back
//! as a [`SessionAction`].
//!
//! State moves not_authenticated -> authenticated -> selected and never
//! skips forward: commands above the current state fail with NO, syntax
//! problems with BAD. A handler error never kills the connection; the
//! loop reports it untagged and keeps reading.

use crate::account::{AccountRegistry, FlagOp};
use crate::config::Config;
use crate::error::Result;
use crate::folder::{self, Folder};
use crate::imap::commands::{parse_sequence_set, ImapCommand};
use crate::imap::response;
use crate::mail::Message;
use crate::security::Authenticator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// UIDs are stable for the lifetime of the store, so validity never rolls.
const UID_VALIDITY: u32 = 1;

/// Upper bound on APPEND literals.
const MAX_APPEND_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
enum SessionState {
    NotAuthenticated,
    Authenticated {
        username: String,
    },
    Selected {
        username: String,
        folder: &'static Folder,
        read_only: bool,
    },
    Logout,
}

/// An APPEND waiting for its literal bytes.
#[derive(Debug, Clone)]
pub struct PendingAppend {
    pub tag: String,
    pub folder: &'static Folder,
    pub flags: Vec<String>,
    pub size: usize,
}

/// Connection-loop follow-up requested by a handler.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Close the connection after writing the reply.
    Logout,
    /// Run the TLS handshake, then restart the read loop.
    StartTls,
    /// Read exactly `pending.size` literal bytes, then call
    /// [`ImapSession::finish_append`].
    CollectAppend(PendingAppend),
}

#[derive(Debug)]
pub struct Reply {
    pub data: Vec<u8>,
    pub action: Option<SessionAction>,
}

impl Reply {
    fn text(text: String) -> Self {
        Self { data: text.into_bytes(), action: None }
    }

    fn bytes(data: Vec<u8>) -> Self {
        Self { data, action: None }
    }

    fn with_action(text: String, action: SessionAction) -> Self {
        Self { data: text.into_bytes(), action: Some(action) }
    }

    fn empty() -> Self {
        Self { data: Vec::new(), action: None }
    }
}

pub struct ImapSession {
    state: SessionState,
    accounts: Arc<AccountRegistry>,
    authenticator: Arc<Authenticator>,
    domain: String,
    /// STARTTLS is offered until used; it never downgrades back.
    tls_available: bool,
    secured: bool,
    idle_tag: Option<String>,
}

impl ImapSession {
    pub fn new(
        config: &Config,
        accounts: Arc<AccountRegistry>,
        authenticator: Arc<Authenticator>,
        tls_available: bool,
        secured: bool,
    ) -> Self {
        Self {
            state: SessionState::NotAuthenticated,
            accounts,
            authenticator,
            domain: config.server.domain.clone(),
            tls_available,
            secured,
            idle_tag: None,
        }
    }

    pub fn greeting(&self) -> String {
        format!(
            "* OK [CAPABILITY {}] {} IMAP4rev1 ready\r\n",
            self.capability_list(),
            self.domain
        )
    }

    pub fn is_idle(&self) -> bool {
        self.idle_tag.is_some()
    }

    pub fn is_logout(&self) -> bool {
        matches!(self.state, SessionState::Logout)
    }

    /// Called by the connection loop once the TLS handshake succeeded.
    /// Authentication from the plaintext phase does not carry over.
    pub fn reset_after_tls(&mut self) {
        self.secured = true;
        self.tls_available = false;
        self.state = SessionState::NotAuthenticated;
    }

    /// Handle one complete command line.
    pub async fn handle_line(&mut self, line: &str) -> Reply {
        // While idling, only DONE is significant; everything else is
        // ignored until the client ends the idle.
        if let Some(tag) = self.idle_tag.clone() {
            if line.trim().eq_ignore_ascii_case("DONE") {
                self.idle_tag = None;
                return Reply::text(format!("{} OK IDLE terminated\r\n", tag));
            }
            debug!(line = %line.trim(), "ignoring input during IDLE");
            return Reply::empty();
        }

        let (tag, command) = match ImapCommand::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                let tag = line.split_whitespace().next().unwrap_or("*");
                return Reply::text(format!("{} BAD {}\r\n", tag, e));
            }
        };

        match self.dispatch(&tag, command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "IMAP command failed");
                Reply::text("* BAD Internal server error\r\n".to_string())
            }
        }
    }

    async fn dispatch(&mut self, tag: &str, command: ImapCommand) -> Result<Reply> {
        match command {
            ImapCommand::Capability => Ok(self.capability(tag)),
            ImapCommand::Noop => self.noop(tag).await,
            ImapCommand::Logout => Ok(self.logout(tag)),
            ImapCommand::StartTls => Ok(self.starttls(tag)),
            ImapCommand::Login { username, password } => Ok(self.login(tag, &username, &password)),
            ImapCommand::Authenticate { mechanism } => Ok(Reply::text(format!(
                "{} NO AUTHENTICATE {} not supported, use LOGIN\r\n",
                tag,
                mechanism.to_uppercase()
            ))),
            ImapCommand::Select { mailbox } => self.select(tag, &mailbox, false).await,
            ImapCommand::Examine { mailbox } => self.select(tag, &mailbox, true).await,
            ImapCommand::List { pattern } => Ok(self.list(tag, "LIST", &pattern)),
            ImapCommand::Lsub { pattern } => Ok(self.list(tag, "LSUB", &pattern)),
            ImapCommand::Xlist { pattern } => Ok(self.list(tag, "XLIST", &pattern)),
            ImapCommand::Status { mailbox } => self.status(tag, &mailbox).await,
            ImapCommand::Create { .. } => Ok(self.acknowledge(tag, "CREATE")),
            ImapCommand::Delete { .. } => Ok(self.acknowledge(tag, "DELETE")),
            ImapCommand::Rename { .. } => Ok(self.acknowledge(tag, "RENAME")),
            ImapCommand::Subscribe { .. } => Ok(self.acknowledge(tag, "SUBSCRIBE")),
            ImapCommand::Unsubscribe { .. } => Ok(self.acknowledge(tag, "UNSUBSCRIBE")),
            ImapCommand::Append { mailbox, flags, size } => {
                Ok(self.append(tag, &mailbox, flags, size))
            }
            ImapCommand::Check => self.check(tag).await,
            ImapCommand::Close => self.close(tag).await,
            ImapCommand::Unselect => Ok(self.unselect(tag)),
            ImapCommand::Expunge { uid_set } => self.expunge(tag, uid_set).await,
            ImapCommand::Search { by_uid, criteria } => self.search(tag, by_uid, &criteria).await,
            ImapCommand::Fetch { by_uid, sequence, items } => {
                self.fetch(tag, by_uid, &sequence, items).await
            }
            ImapCommand::Store { by_uid, sequence, op, silent, flags } => {
                self.store(tag, by_uid, &sequence, op, silent, flags).await
            }
            ImapCommand::Copy { by_uid, sequence, mailbox } => {
                self.copy_or_move(tag, by_uid, &sequence, &mailbox, false).await
            }
            ImapCommand::Move { by_uid, sequence, mailbox } => {
                self.copy_or_move(tag, by_uid, &sequence, &mailbox, true).await
            }
            ImapCommand::Idle => Ok(self.idle(tag)),
            ImapCommand::Namespace => Ok(self.namespace(tag)),
            ImapCommand::Done => Ok(Reply::text("* BAD DONE without IDLE\r\n".to_string())),
            ImapCommand::Unknown { verb } => {
                Ok(Reply::text(format!("{} BAD Unknown command {}\r\n", tag, verb)))
            }
        }
    }

    fn capability_list(&self) -> String {
        let mut caps = vec!["IMAP4rev1"];
        if self.tls_available && !self.secured {
            caps.push("STARTTLS");
        }
        caps.extend([
            "AUTH=PLAIN",
            "AUTH=LOGIN",
            "IDLE",
            "NAMESPACE",
            "UIDPLUS",
            "UNSELECT",
            "CHILDREN",
            "SPECIAL-USE",
            "MOVE",
        ]);
        caps.join(" ")
    }

    fn capability(&self, tag: &str) -> Reply {
        Reply::text(format!(
            "* CAPABILITY {}\r\n{} OK CAPABILITY completed\r\n",
            self.capability_list(),
            tag
        ))
    }

    fn login(&mut self, tag: &str, username: &str, password: &str) -> Reply {
        if !matches!(self.state, SessionState::NotAuthenticated) {
            return Reply::text(format!("{} NO Already authenticated\r\n", tag));
        }
        if self.authenticator.verify_login(username, password) {
            let user = Authenticator::strip_domain(username).to_string();
            info!(user = %user, "IMAP login");
            self.state = SessionState::Authenticated { username: user };
            Reply::text(format!("{} OK LOGIN completed\r\n", tag))
        } else {
            warn!(user = %username, "IMAP login rejected");
            Reply::text(format!("{} NO LOGIN failed: invalid credentials\r\n", tag))
        }
    }

    fn logout(&mut self, tag: &str) -> Reply {
        self.state = SessionState::Logout;
        Reply::with_action(
            format!(
                "* BYE {} IMAP4rev1 server signing off\r\n{} OK LOGOUT completed\r\n",
                self.domain, tag
            ),
            SessionAction::Logout,
        )
    }

    fn starttls(&mut self, tag: &str) -> Reply {
        if self.secured {
            return Reply::text(format!("{} NO Already using TLS\r\n", tag));
        }
        if !self.tls_available {
            return Reply::text(format!("{} NO STARTTLS not available\r\n", tag));
        }
        Reply::with_action(
            format!("{} OK Begin TLS negotiation\r\n", tag),
            SessionAction::StartTls,
        )
    }

    fn current_user(&self) -> Option<String> {
        match &self.state {
            SessionState::Authenticated { username } => Some(username.clone()),
            SessionState::Selected { username, .. } => Some(username.clone()),
            _ => None,
        }
    }

    fn selection(&self) -> Option<(String, &'static Folder, bool)> {
        match &self.state {
            SessionState::Selected { username, folder, read_only } => {
                Some((username.clone(), folder, *read_only))
            }
            _ => None,
        }
    }

    fn acknowledge(&self, tag: &str, verb: &str) -> Reply {
        // The folder set is fixed; mailbox management is accepted and
        // dropped so clients that insist on housekeeping stay happy.
        if self.current_user().is_none() {
            return Reply::text(format!("{} NO Not authenticated\r\n", tag));
        }
        Reply::text(format!("{} OK {} completed\r\n", tag, verb))
    }

    async fn select(&mut self, tag: &str, mailbox: &str, read_only: bool) -> Result<Reply> {
        let Some(username) = self.current_user() else {
            return Ok(Reply::text(format!("{} NO Not authenticated\r\n", tag)));
        };
        let Some(folder) = folder::resolve(mailbox) else {
            return Ok(Reply::text(format!("{} NO No such mailbox: {}\r\n", tag, mailbox)));
        };

        let account = self.accounts.account(&username).await;
        // Selection is the client's sync point: always hit the store.
        let messages = account.load_folder(folder, true).await?;
        let status = account.status(folder).await?;
        let first_unseen = messages
            .iter()
            .position(|m| !m.has_flag("\\Seen"))
            .map(|index| index + 1);

        let mut text = String::new();
        text.push_str(&format!("* {} EXISTS\r\n", messages.len()));
        text.push_str("* 0 RECENT\r\n");
        text.push_str("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n");
        text.push_str(&format!("* OK [UIDVALIDITY {}] UIDs valid\r\n", UID_VALIDITY));
        text.push_str(&format!("* OK [UIDNEXT {}] Predicted next UID\r\n", status.next_uid));
        if let Some(seq) = first_unseen {
            text.push_str(&format!("* OK [UNSEEN {}] First unseen message\r\n", seq));
        }
        text.push_str(
            "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*)] Flags permitted\r\n",
        );
        if read_only {
            text.push_str(&format!("{} OK [READ-ONLY] EXAMINE completed\r\n", tag));
        } else {
            text.push_str(&format!("{} OK [READ-WRITE] SELECT completed\r\n", tag));
        }

        self.state = SessionState::Selected { username, folder, read_only };
        Ok(Reply::text(text))
    }

    fn list(&self, tag: &str, verb: &str, pattern: &str) -> Reply {
        if self.current_user().is_none() {
            return Reply::text(format!("{} NO Not authenticated\r\n", tag));
        }
        let mut text = String::new();
        for folder in folder::FOLDERS {
            if !pattern_matches(pattern, folder.name) {
                continue;
            }
            text.push_str(&format!(
                "* {} ({}) \"/\" {}\r\n",
                verb,
                folder.attributes,
                response::imap_quote(folder.name)
            ));
        }
        text.push_str(&format!("{} OK {} completed\r\n", tag, verb));
        Reply::text(text)
    }

    async fn status(&mut self, tag: &str, mailbox: &str) -> Result<Reply> {
        let Some(username) = self.current_user() else {
            return Ok(Reply::text(format!("{} NO Not authenticated\r\n", tag)));
        };
        let Some(folder) = folder::resolve(mailbox) else {
            return Ok(Reply::text(format!("{} NO No such mailbox: {}\r\n", tag, mailbox)));
        };
        let account = self.accounts.account(&username).await;
        let status = account.status(folder).await?;
        Ok(Reply::text(format!(
            "* STATUS {} (MESSAGES {} RECENT 0 UIDNEXT {} UNSEEN {})\r\n{} OK STATUS completed\r\n",
            response::imap_quote(folder.name),
            status.messages,
            status.next_uid,
            status.unseen,
            tag
        )))
    }

    async fn noop(&mut self, tag: &str) -> Result<Reply> {
        if let Some((username, folder, _)) = self.selection() {
            let account = self.accounts.account(&username).await;
            let (count, changed) = account.refresh(folder).await?;
            let mut text = String::new();
            if changed {
                text.push_str(&format!("* {} EXISTS\r\n", count));
            }
            text.push_str(&format!("{} OK NOOP completed\r\n", tag));
            return Ok(Reply::text(text));
        }
        Ok(Reply::text(format!("{} OK NOOP completed\r\n", tag)))
    }

    async fn check(&mut self, tag: &str) -> Result<Reply> {
        let Some((username, folder, _)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        let account = self.accounts.account(&username).await;
        account.refresh(folder).await?;
        Ok(Reply::text(format!("{} OK CHECK completed\r\n", tag)))
    }

    async fn fetch(
        &mut self,
        tag: &str,
        by_uid: bool,
        sequence: &str,
        items: Vec<String>,
    ) -> Result<Reply> {
        let Some((username, folder, _)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        let account = self.accounts.account(&username).await;
        let messages = account.load_folder(folder, false).await?;
        let selected = match select_targets(&messages, sequence, by_uid) {
            Ok(selected) => selected,
            Err(e) => return Ok(Reply::text(format!("{} BAD {}\r\n", tag, e))),
        };

        let items = expand_macros(items);
        let need_raw = response::items_need_raw(&items);
        let mut data = Vec::new();
        for (seq, message) in &selected {
            let raw = if need_raw {
                Some(account.raw_message(&message.storage_key).await?)
            } else {
                None
            };
            data.extend(response::fetch_line(*seq, message, &items, by_uid, raw.as_deref()));
        }
        let verb = if by_uid { "UID FETCH" } else { "FETCH" };
        data.extend(format!("{} OK {} completed\r\n", tag, verb).into_bytes());
        Ok(Reply::bytes(data))
    }

    async fn search(&mut self, tag: &str, by_uid: bool, criteria: &str) -> Result<Reply> {
        let Some((username, folder, _)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        let account = self.accounts.account(&username).await;
        let messages = account.load_folder(folder, false).await?;

        // Criteria are not evaluated; every message matches and the
        // client narrows the result itself.
        debug!(criteria = %criteria, "SEARCH returns the full set");
        let ids: Vec<String> = if by_uid {
            messages.iter().map(|m| m.uid.to_string()).collect()
        } else {
            (1..=messages.len()).map(|n| n.to_string()).collect()
        };

        let mut text = String::from("* SEARCH");
        if !ids.is_empty() {
            text.push(' ');
            text.push_str(&ids.join(" "));
        }
        text.push_str("\r\n");
        let verb = if by_uid { "UID SEARCH" } else { "SEARCH" };
        text.push_str(&format!("{} OK {} completed\r\n", tag, verb));
        Ok(Reply::text(text))
    }

    async fn store(
        &mut self,
        tag: &str,
        by_uid: bool,
        sequence: &str,
        op: FlagOp,
        silent: bool,
        flags: Vec<String>,
    ) -> Result<Reply> {
        let Some((username, folder, read_only)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        if read_only {
            return Ok(Reply::text(format!("{} NO Mailbox is read-only\r\n", tag)));
        }

        let account = self.accounts.account(&username).await;
        let messages = account.load_folder(folder, false).await?;
        let selected = match select_targets(&messages, sequence, by_uid) {
            Ok(selected) => selected,
            Err(e) => return Ok(Reply::text(format!("{} BAD {}\r\n", tag, e))),
        };

        let keys: Vec<String> = selected.iter().map(|(_, m)| m.storage_key.clone()).collect();
        let results = account.apply_flags(folder, &keys, op, &flags).await?;

        let mut data = Vec::new();
        if !silent {
            for (seq, message) in &selected {
                let Some(new_flags) = results.get(&message.storage_key) else {
                    continue;
                };
                if by_uid {
                    data.extend(
                        format!(
                            "* {} FETCH (UID {} FLAGS {})\r\n",
                            seq,
                            message.uid,
                            response::flag_list(new_flags)
                        )
                        .into_bytes(),
                    );
                } else {
                    data.extend(
                        format!("* {} FETCH (FLAGS {})\r\n", seq, response::flag_list(new_flags))
                            .into_bytes(),
                    );
                }
            }
        }
        let verb = if by_uid { "UID STORE" } else { "STORE" };
        data.extend(format!("{} OK {} completed\r\n", tag, verb).into_bytes());
        Ok(Reply::bytes(data))
    }

    async fn expunge(&mut self, tag: &str, uid_set: Option<String>) -> Result<Reply> {
        let Some((username, folder, read_only)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        if read_only {
            return Ok(Reply::text(format!("{} NO Mailbox is read-only\r\n", tag)));
        }

        let account = self.accounts.account(&username).await;
        let messages = account.load_folder(folder, false).await?;
        let uid_filter = match &uid_set {
            Some(set) => {
                let max = messages.last().map(|m| m.uid).unwrap_or(0);
                match parse_sequence_set(set, max) {
                    Ok(uids) => Some(uids),
                    Err(e) => return Ok(Reply::text(format!("{} BAD {}\r\n", tag, e))),
                }
            }
            None => None,
        };

        // Only messages the client marked \Deleted leave, with UID
        // EXPUNGE narrowing further.
        let keys: Vec<String> = messages
            .iter()
            .filter(|m| m.has_flag("\\Deleted"))
            .filter(|m| {
                uid_filter
                    .as_ref()
                    .map(|uids| uids.binary_search(&m.uid).is_ok())
                    .unwrap_or(true)
            })
            .map(|m| m.storage_key.clone())
            .collect();

        let removed = account.remove_messages(folder, &keys).await?;
        let mut text = String::new();
        for seq in &removed.expunged_seqs {
            text.push_str(&format!("* {} EXPUNGE\r\n", seq));
        }
        if !removed.expunged_seqs.is_empty() {
            text.push_str(&format!("* {} EXISTS\r\n", removed.remaining));
        }
        let verb = if uid_set.is_some() { "UID EXPUNGE" } else { "EXPUNGE" };
        text.push_str(&format!("{} OK {} completed\r\n", tag, verb));
        Ok(Reply::text(text))
    }

    async fn close(&mut self, tag: &str) -> Result<Reply> {
        let Some((username, folder, read_only)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        // CLOSE expunges silently; EXAMINE selections skip the expunge.
        if !read_only {
            let account = self.accounts.account(&username).await;
            let messages = account.load_folder(folder, false).await?;
            let keys: Vec<String> = messages
                .iter()
                .filter(|m| m.has_flag("\\Deleted"))
                .map(|m| m.storage_key.clone())
                .collect();
            if !keys.is_empty() {
                account.remove_messages(folder, &keys).await?;
            }
        }
        self.state = SessionState::Authenticated { username };
        Ok(Reply::text(format!("{} OK CLOSE completed\r\n", tag)))
    }

    fn unselect(&mut self, tag: &str) -> Reply {
        let Some((username, _, _)) = self.selection() else {
            return Reply::text(format!("{} NO Not selected\r\n", tag));
        };
        self.state = SessionState::Authenticated { username };
        Reply::text(format!("{} OK UNSELECT completed\r\n", tag))
    }

    async fn copy_or_move(
        &mut self,
        tag: &str,
        by_uid: bool,
        sequence: &str,
        mailbox: &str,
        is_move: bool,
    ) -> Result<Reply> {
        let verb = match (is_move, by_uid) {
            (true, true) => "UID MOVE",
            (true, false) => "MOVE",
            (false, true) => "UID COPY",
            (false, false) => "COPY",
        };
        let Some((username, folder, read_only)) = self.selection() else {
            return Ok(Reply::text(format!("{} NO Not selected\r\n", tag)));
        };
        if is_move && read_only {
            return Ok(Reply::text(format!("{} NO Mailbox is read-only\r\n", tag)));
        }
        let Some(dest) = folder::resolve(mailbox) else {
            return Ok(Reply::text(format!("{} NO No such mailbox: {}\r\n", tag, mailbox)));
        };
        if dest.is_virtual() {
            return Ok(Reply::text(format!(
                "{} NO Cannot {} into virtual mailbox {}\r\n",
                tag, verb, dest.name
            )));
        }

        let account = self.accounts.account(&username).await;
        let messages = account.load_folder(folder, false).await?;
        let selected = match select_targets(&messages, sequence, by_uid) {
            Ok(selected) => selected,
            Err(e) => return Ok(Reply::text(format!("{} BAD {}\r\n", tag, e))),
        };
        let keys: Vec<String> = selected.iter().map(|(_, m)| m.storage_key.clone()).collect();

        account.copy_messages(&keys, dest).await?;

        let mut text = String::new();
        if is_move {
            let removed = account.remove_messages(folder, &keys).await?;
            for seq in &removed.expunged_seqs {
                text.push_str(&format!("* {} EXPUNGE\r\n", seq));
            }
            if !removed.expunged_seqs.is_empty() {
                text.push_str(&format!("* {} EXISTS\r\n", removed.remaining));
            }
        }
        text.push_str(&format!("{} OK {} completed\r\n", tag, verb));
        Ok(Reply::text(text))
    }

    fn append(&mut self, tag: &str, mailbox: &str, flags: Vec<String>, size: usize) -> Reply {
        if self.current_user().is_none() {
            return Reply::text(format!("{} NO Not authenticated\r\n", tag));
        }
        let Some(folder) = folder::resolve(mailbox) else {
            return Reply::text(format!("{} NO [TRYCREATE] No such mailbox: {}\r\n", tag, mailbox));
        };
        if folder.is_virtual() {
            return Reply::text(format!(
                "{} NO Cannot append to virtual mailbox {}\r\n",
                tag, folder.name
            ));
        }
        if size > MAX_APPEND_SIZE {
            return Reply::text(format!("{} NO APPEND message too large\r\n", tag));
        }
        Reply::with_action(
            "+ Ready for literal data\r\n".to_string(),
            SessionAction::CollectAppend(PendingAppend {
                tag: tag.to_string(),
                folder,
                flags,
                size,
            }),
        )
    }

    /// Second half of APPEND, once the literal arrived.
    pub async fn finish_append(&mut self, pending: PendingAppend, raw: Vec<u8>) -> Reply {
        let Some(username) = self.current_user() else {
            return Reply::text(format!("{} NO Not authenticated\r\n", pending.tag));
        };
        let account = self.accounts.account(&username).await;
        match account.append(pending.folder, &pending.flags, raw).await {
            Ok(uid) => Reply::text(format!(
                "{} OK [APPENDUID {} {}] APPEND completed\r\n",
                pending.tag, UID_VALIDITY, uid
            )),
            Err(e) => {
                warn!(error = %e, folder = %pending.folder.name, "APPEND failed");
                Reply::text(format!("{} NO APPEND failed\r\n", pending.tag))
            }
        }
    }

    fn idle(&mut self, tag: &str) -> Reply {
        if self.current_user().is_none() {
            return Reply::text(format!("{} NO Not authenticated\r\n", tag));
        }
        self.idle_tag = Some(tag.to_string());
        Reply::text("+ idling\r\n".to_string())
    }

    fn namespace(&self, tag: &str) -> Reply {
        if self.current_user().is_none() {
            return Reply::text(format!("{} NO Not authenticated\r\n", tag));
        }
        Reply::text(format!(
            "* NAMESPACE ((\"\" \"/\")) NIL NIL\r\n{} OK NAMESPACE completed\r\n",
            tag
        ))
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    // The hierarchy is flat, so * and % select everything.
    match pattern {
        "*" | "%" | "" => true,
        _ => pattern.eq_ignore_ascii_case(name),
    }
}

/// Resolve a sequence set against the current view: positions for
/// sequence-number sets, UID matches for UID sets. Always returns pairs
/// of (sequence number, message).
fn select_targets(
    messages: &[Message],
    sequence: &str,
    by_uid: bool,
) -> Result<Vec<(u32, Message)>> {
    let max = if by_uid {
        messages.last().map(|m| m.uid).unwrap_or(0)
    } else {
        messages.len() as u32
    };
    let ids = parse_sequence_set(sequence, max)?;

    let mut selected = Vec::new();
    if by_uid {
        for (index, message) in messages.iter().enumerate() {
            if ids.binary_search(&message.uid).is_ok() {
                selected.push(((index + 1) as u32, message.clone()));
            }
        }
    } else {
        for id in ids {
            if let Some(message) = messages.get(id as usize - 1) {
                selected.push((id, message.clone()));
            }
        }
    }
    Ok(selected)
}

fn expand_macros(items: Vec<String>) -> Vec<String> {
    let mut expanded = Vec::with_capacity(items.len());
    for item in items {
        match item.to_uppercase().as_str() {
            "ALL" => expanded.extend(
                ["FLAGS", "INTERNALDATE", "RFC822.SIZE", "ENVELOPE"].map(String::from),
            ),
            "FAST" => {
                expanded.extend(["FLAGS", "INTERNALDATE", "RFC822.SIZE"].map(String::from))
            }
            "FULL" => expanded.extend(
                ["FLAGS", "INTERNALDATE", "RFC822.SIZE", "ENVELOPE", "BODY"].map(String::from),
            ),
            _ => expanded.push(item),
        }
    }
    expanded
}
