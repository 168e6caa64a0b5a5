use std::cmp::Reverse;

use surrealdb::sql::Thing;

use crate::database::{record_key, DbParticipant, GameRecords};
use crate::identity::Principal;

impl GameRecords {
    pub fn summary(&self) -> common::GameSummary {
        common::GameSummary {
            id: record_key(&self.game.id),
            name: self.game.name.clone(),
            admin: self.game.admin.clone(),
            locked: self.game.locked,
            start_date: self.game.start_date,
            end_date: self.game.end_date,
            participant_count: self.participants.len(),
        }
    }

    /// The whole game as `viewer` may see it.
    pub fn view(&self, viewer: &Principal) -> common::Game {
        let is_admin = self.is_admin(viewer);
        common::Game {
            id: record_key(&self.game.id),
            name: self.game.name.clone(),
            admin: self.game.admin.clone(),
            initial_balance: self.game.initial_balance,
            locked: self.game.locked,
            join_code: self.game.join_code.clone().filter(|_| is_admin),
            join_code_expires_at: self.game.join_code_expires_at.filter(|_| is_admin),
            start_date: self.game.start_date,
            end_date: self.game.end_date,
            categories: self
                .categories
                .iter()
                .map(|category| common::Category {
                    id: record_key(&category.id),
                    name: category.name.clone(),
                    winner_id: category.winner.as_ref().map(record_key),
                    nominees: self
                        .nominees
                        .iter()
                        .filter(|nominee| nominee.category == category.id)
                        .map(|nominee| common::Nominee {
                            id: record_key(&nominee.id),
                            name: nominee.name.clone(),
                            odds: nominee.odds,
                        })
                        .collect(),
                })
                .collect(),
            participants: self
                .participants
                .iter()
                .map(|participant| self.participant_view(participant))
                .collect(),
            leaderboard: self.leaderboard(),
        }
    }

    pub fn participant_view(&self, participant: &DbParticipant) -> common::Participant {
        common::Participant {
            id: record_key(&participant.id),
            principal: participant.principal.clone(),
            initial_balance: participant.initial_balance,
            balance: participant.balance,
            bets: self.bet_views(&participant.id),
        }
    }

    /// A participant's bets with category and nominee names, in category order.
    pub fn bet_views(&self, participant: &Thing) -> Vec<common::Bet> {
        let mut bets: Vec<_> = self
            .bets_of(participant)
            .filter_map(|bet| {
                let category = self.category_by_id(&bet.category)?;
                let nominee = self.nominee_by_id(&bet.nominee)?;
                Some((category.position, bet, category, nominee))
            })
            .collect();
        bets.sort_by_key(|(position, ..)| *position);

        bets.into_iter()
            .map(|(_, bet, category, nominee)| common::Bet {
                id: record_key(&bet.id),
                category_id: record_key(&category.id),
                category_name: category.name.clone(),
                nominee_id: record_key(&nominee.id),
                nominee_name: nominee.name.clone(),
                odds: nominee.odds,
                amount: bet.amount,
                paid_out: bet.paid_out,
                payout_amount: bet.payout_amount,
            })
            .collect()
    }

    /// Participants ranked by balance. Equal balances share a rank and the
    /// next rank skips accordingly (1, 1, 3).
    pub fn leaderboard(&self) -> Vec<common::Standing> {
        let mut ordered: Vec<&DbParticipant> = self.participants.iter().collect();
        ordered.sort_by_key(|participant| (Reverse(participant.balance), participant.principal.clone()));

        let mut standings: Vec<common::Standing> = Vec::with_capacity(ordered.len());
        for (index, participant) in ordered.into_iter().enumerate() {
            let rank = match standings.last() {
                Some(previous) if previous.balance == participant.balance => previous.rank,
                _ => index + 1,
            };
            standings.push(common::Standing {
                rank,
                principal: participant.principal.clone(),
                balance: participant.balance,
            });
        }
        standings
    }
}
