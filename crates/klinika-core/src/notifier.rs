//! CS hand-off: one outbound WhatsApp notification per qualified lead.
//!
//! Fires at most once per profile (`notified_cs`), only for `high` /
//! `very_high` leads, and only while the `cs_status` setting is not
//! `inactive`. An absent or unreadable setting counts as active so that a
//! settings hiccup never silently drops leads.

use std::sync::Arc;

use tracing::{debug, info, warn};

use klinika_store::Store;
use klinika_types::UserProfile;

use crate::config::CoreConfig;
use crate::sender::OutboundSender;

pub struct CsNotifier {
    store: Arc<dyn Store>,
    sender: Arc<dyn OutboundSender>,
    config: Arc<CoreConfig>,
}

impl CsNotifier {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn OutboundSender>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            store,
            sender,
            config,
        }
    }

    /// Notify the CS number about `profile` if it crossed the lead threshold
    /// and has not been notified before. Returns whether a notification went
    /// out. Never fails the caller: every skip or error resolves to `false`.
    pub async fn maybe_notify(&self, profile: &UserProfile) -> bool {
        let wa_number = &profile.wa_number;
        if !profile.is_qualified_lead() {
            debug!("{wa_number} has not crossed the lead threshold; no CS notification");
            return false;
        }
        if profile.notified_cs {
            debug!("CS already notified about {wa_number}");
            return false;
        }
        if !self.notifications_active().await {
            info!("CS notifications are inactive; skipping {wa_number}");
            return false;
        }
        let cs_number = match self.store.get_setting("cs_number").await {
            Ok(Some(number)) if !number.trim().is_empty() => number,
            Ok(_) => {
                warn!("cs_number is not configured; cannot notify about {wa_number}");
                return false;
            }
            Err(e) => {
                warn!("failed to read cs_number setting: {e}");
                return false;
            }
        };

        let message = self.render_message(profile);
        if let Err(e) = self.sender.send_text(&cs_number, &message).await {
            warn!("failed to send CS notification about {wa_number}: {e}");
            return false;
        }

        // The flag write is best-effort: the notification already went out,
        // so a failure here risks a duplicate later, not a lost lead.
        if let Err(e) = self.store.mark_cs_notified(wa_number).await {
            warn!("failed to mark {wa_number} as CS-notified: {e}");
        }
        info!("CS notified about qualified lead {wa_number}");
        true
    }

    /// `cs_status` gate: only an explicit `inactive` turns notifications off.
    async fn notifications_active(&self) -> bool {
        match self.store.get_setting("cs_status").await {
            Ok(Some(status)) => status != "inactive",
            Ok(None) => true,
            Err(e) => {
                warn!("failed to read cs_status setting, assuming active: {e}");
                true
            }
        }
    }

    fn render_message(&self, profile: &UserProfile) -> String {
        let name = profile.insights.name.as_deref().unwrap_or("Tidak diketahui");
        let keluhan = profile
            .insights
            .keluhan
            .as_deref()
            .unwrap_or("Tidak diketahui");
        format!(
            "🔔 User tertarik untuk konsultasi:\n\n\
             Nama: {name}\n\n\
             Nomor: wa.me/{wa}\n\n\
             Keluhan: {keluhan}\n\n\
             Lead: HIGH\n\n\
             Lihat profil lengkap: {dashboard}/user/{wa}\n\n\
             Segera hubungi untuk sesi call konsultasi 🙌",
            wa = profile.wa_number,
            dashboard = self.config.dashboard_url,
        )
    }
}
