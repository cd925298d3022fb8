//! End-to-end redemption: permission in, [`RedemptionResult`] out.
//!
//! Stages run in a fixed order. Everything up to and including the balance
//! check is local or read-only, so a request that fails validation or a
//! precondition never reaches the relay.

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::Utc;
use tracing::{info, warn};

use crate::{
    calls::CallBuilder,
    chain::ChainClient,
    config::PipelineConfig,
    confirmation::ConfirmationResolver,
    error::{PreconditionError, Result, ValidationError},
    estimation::GasEstimator,
    history::RedemptionHistory,
    outcome::OutcomeInterpreter,
    permission::{CaveatTerms, Permission, RawPermission, normalize},
    registry::{ChainDeployment, ChainRegistry},
    relay::{RelayClient, UserOperation},
    result::{RedemptionParties, RedemptionResult},
    signer::OperationSigner,
    source::PermissionSource,
    submission::OperationSubmitter,
};

/// One redemption to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionRequest {
    /// The stored permission to redeem.
    pub permission: RawPermission,
    /// The delegate smart account redeeming it; also pays for gas.
    pub delegate: Address,
    /// Token to transfer. Defaults to the caveat's token, then the chain's
    /// default token.
    pub token: Option<Address>,
    /// Amount in the token's base units.
    pub amount: U256,
    /// Factory of an undeployed delegate account.
    pub factory: Option<Address>,
    pub factory_data: Option<Bytes>,
}

impl RedemptionRequest {
    /// Request for an already deployed delegate account.
    pub const fn new(permission: RawPermission, delegate: Address, amount: U256) -> Self {
        Self { permission, delegate, token: None, amount, factory: None, factory_data: None }
    }

    /// Sets the token.
    pub fn with_token(mut self, token: Address) -> Self {
        self.token = Some(token);
        self
    }
}

/// An operation that was submitted but whose outcome is not yet recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRedemption {
    pub user_op_hash: B256,
    pub parties: RedemptionParties,
    /// EntryPoint the operation was sent to. Defaults to the chain's.
    pub entry_point: Option<Address>,
}

/// Redeems delegations through a relay.
#[derive(Debug)]
pub struct RedemptionPipeline<C, R, S> {
    chain: Arc<C>,
    relay: Arc<R>,
    signer: Arc<S>,
    registry: ChainRegistry,
    config: PipelineConfig,
    estimator: GasEstimator<C, R>,
    submitter: OperationSubmitter<R, S>,
    resolver: ConfirmationResolver<C, R>,
    interpreter: OutcomeInterpreter,
    history: Option<Arc<dyn RedemptionHistory>>,
}

impl<C, R, S> RedemptionPipeline<C, R, S>
where
    C: ChainClient,
    R: RelayClient,
    S: OperationSigner,
{
    /// Creates a pipeline for `config.chain_id`.
    pub fn new(
        chain: Arc<C>,
        relay: Arc<R>,
        signer: Arc<S>,
        registry: ChainRegistry,
        config: PipelineConfig,
    ) -> Self {
        Self {
            estimator: GasEstimator::new(chain.clone(), relay.clone(), config.estimation),
            submitter: OperationSubmitter::new(relay.clone(), signer.clone(), config.submission),
            resolver: ConfirmationResolver::new(chain.clone(), relay.clone(), config.confirmation),
            interpreter: OutcomeInterpreter,
            chain,
            relay,
            signer,
            registry,
            config,
            history: None,
        }
    }

    /// Records every produced result in `history`.
    pub fn with_history(mut self, history: Arc<dyn RedemptionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Settings in use.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The active chain's deployment.
    pub fn deployment(&self) -> Result<&ChainDeployment> {
        Ok(self.registry.require(self.config.chain_id)?)
    }

    /// Looks up the active permission in `source` and redeems it.
    pub async fn redeem_for(
        &self,
        source: &dyn PermissionSource,
        delegator: Address,
        delegate: Address,
        token: Option<Address>,
        amount: U256,
    ) -> Result<RedemptionResult> {
        let permission = source
            .find_active(delegator, delegate)
            .await?
            .ok_or(PreconditionError::NoActivePermission { delegator, delegate })?;
        let mut request = RedemptionRequest::new(permission, delegate, amount);
        request.token = token;
        self.redeem(request).await
    }

    /// Runs one redemption to a final result.
    ///
    /// `Ok` carries both successes and on-chain failures; see
    /// [`RedemptionResult::reverted_error`]. An operation whose outcome could
    /// not be determined is [`RedemptionError::Unconfirmed`](crate::RedemptionError::Unconfirmed).
    pub async fn redeem(&self, request: RedemptionRequest) -> Result<RedemptionResult> {
        if request.amount.is_zero() {
            return Err(ValidationError::ZeroAmount.into());
        }
        let permission = normalize(&request.permission, request.delegate)?;
        let deployment = self.deployment()?;
        let builder = CallBuilder::for_deployment(deployment)?;
        let token = self.checked_token(&permission, deployment, request.token, request.amount)?;
        let calls = builder.build(&permission, token, request.amount);

        let sender = permission.delegate;
        self.estimator.ensure_funded(sender).await?;
        let (factory, factory_data) =
            self.deployment_data(sender, request.factory, request.factory_data).await?;

        let entry_point = self.resolve_entry_point(deployment.entry_point).await;
        let nonce = self.nonce(entry_point, sender).await;

        let mut user_operation = UserOperation {
            sender,
            nonce,
            factory,
            factory_data,
            call_data: calls.account_call_data,
            call_gas_limit: U256::ZERO,
            verification_gas_limit: U256::ZERO,
            pre_verification_gas: U256::ZERO,
            max_fee_per_gas: U256::ZERO,
            max_priority_fee_per_gas: U256::ZERO,
            signature: self.signer.dummy_signature(),
        };
        self.estimator.plan(&user_operation, entry_point).await?.apply(&mut user_operation);

        let submitted =
            self.submitter.submit(user_operation, entry_point, self.config.chain_id).await?;
        info!(
            target: "redeem-pipeline",
            user_op_hash = %submitted.user_op_hash,
            attempts = submitted.attempts,
            delegator = %permission.delegator,
            delegate = %sender,
            "redemption submitted"
        );

        let parties = RedemptionParties {
            delegator: permission.delegator,
            delegate: sender,
            token,
            amount: request.amount,
        };
        self.finish(submitted.user_op_hash, entry_point, parties).await
    }

    /// Re-runs confirmation for an operation that was already submitted.
    /// Never resubmits.
    pub async fn reconcile(&self, pending: PendingRedemption) -> Result<RedemptionResult> {
        let entry_point = match pending.entry_point {
            Some(entry_point) => entry_point,
            None => self.deployment()?.entry_point,
        };
        info!(target: "redeem-pipeline", user_op_hash = %pending.user_op_hash, "rechecking submitted operation");
        self.finish(pending.user_op_hash, entry_point, pending.parties).await
    }

    async fn finish(
        &self,
        user_op_hash: B256,
        entry_point: Address,
        parties: RedemptionParties,
    ) -> Result<RedemptionResult> {
        let explorer = self
            .registry
            .get(self.config.chain_id)
            .and_then(|deployment| deployment.explorer_link(user_op_hash));
        let receipt = self.resolver.resolve(user_op_hash, entry_point, explorer).await?;
        let interpretation = self.interpreter.interpret(&receipt, parties.amount);
        let result = RedemptionResult::new(parties, user_op_hash, receipt.tier, interpretation);

        info!(
            target: "redeem-pipeline",
            %user_op_hash,
            success = result.success,
            tier = %result.confirmed_by,
            gas_used = %result.gas_used,
            message = %result.message,
            "redemption finished"
        );
        self.persist(&result).await;
        Ok(result)
    }

    /// Resolves the token and checks it and the amount against the
    /// period-transfer caveat, if the permission has one.
    fn checked_token(
        &self,
        permission: &Permission,
        deployment: &ChainDeployment,
        requested: Option<Address>,
        amount: U256,
    ) -> Result<Address> {
        let terms = permission.caveat_terms(deployment.period_transfer_enforcer);
        let period = terms.iter().find_map(CaveatTerms::as_period_transfer);

        let token = requested
            .or(period.map(|terms| terms.token))
            .or(deployment.default_token)
            .ok_or(ValidationError::MissingField("token"))?;

        if let Some(period) = period {
            if period.token != token {
                return Err(
                    ValidationError::TokenMismatch { permitted: period.token, requested: token }
                        .into(),
                );
            }
            if amount > period.period_amount {
                return Err(ValidationError::AmountExceedsAllowance {
                    requested: amount,
                    allowance: period.period_amount,
                }
                .into());
            }
            let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
            if !period.has_started(now) {
                warn!(target: "redeem-pipeline", start_date = %period.start_date, "permission period has not started yet");
            }
        }
        for caveat in &terms {
            if let CaveatTerms::Unrecognized { enforcer, reason } = caveat {
                info!(target: "redeem-pipeline", %enforcer, reason, "caveat passed through undecoded");
            }
        }
        Ok(token)
    }

    /// Factory data to send: none for a deployed account, the caller's for an
    /// undeployed one.
    async fn deployment_data(
        &self,
        account: Address,
        factory: Option<Address>,
        factory_data: Option<Bytes>,
    ) -> Result<(Option<Address>, Option<Bytes>)> {
        let code = self.chain.code(account).await?;
        if !code.is_empty() {
            return Ok((None, None));
        }
        match factory {
            Some(factory) => Ok((Some(factory), factory_data)),
            None => Err(PreconditionError::AccountNotDeployed { account }.into()),
        }
    }

    /// The configured EntryPoint when the relay supports it, else the relay's
    /// first.
    async fn resolve_entry_point(&self, configured: Address) -> Address {
        match self.relay.supported_entry_points().await {
            Ok(supported) if supported.contains(&configured) => configured,
            Ok(supported) => match supported.first() {
                Some(&first) => {
                    warn!(target: "redeem-pipeline", %configured, relay = %first, "relay does not support the configured entry point");
                    first
                }
                None => configured,
            },
            Err(err) => {
                warn!(target: "redeem-pipeline", error = %err, "could not query supported entry points");
                configured
            }
        }
    }

    async fn nonce(&self, entry_point: Address, sender: Address) -> U256 {
        match self.chain.entry_point_nonce(entry_point, sender).await {
            Ok(nonce) => nonce,
            Err(err) => {
                warn!(target: "redeem-pipeline", %sender, error = %err, "nonce read failed, using 0");
                U256::ZERO
            }
        }
    }

    async fn persist(&self, result: &RedemptionResult) {
        let Some(history) = &self.history else { return };
        if let Err(err) = history.record(result).await {
            warn!(target: "redeem-pipeline", id = %result.id, error = %err, "failed to record redemption");
        }
    }
}
