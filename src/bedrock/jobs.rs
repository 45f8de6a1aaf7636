//! Batch and fine-tuning control-plane transforms.
//!
//! Bedrock model-invocation-jobs and model-customization-jobs are reshaped
//! into the canonical OpenAI batch / fine_tuning.job records. Job ids on the
//! canonical side are URL-encoded job ARNs; file ids are URL-encoded S3 URIs.

use crate::error::AppError;
use crate::models::jobs::{
    BatchJob, CreateBatchRequest, CreateFineTuningJobRequest, FineTuningJob, Hyperparameters,
    JobError, JobStatus, ListResponse,
};
use crate::s3::{file_id_from_s3_uri, s3_uri_from_file_id, split_s3_uri};
use crate::target::ProviderTarget;
use serde_json::{json, Map, Value};

/// Build the CreateModelInvocationJob body for a canonical batch request.
pub fn create_batch_body(
    req: &CreateBatchRequest,
    target: &ProviderTarget,
) -> Result<Value, AppError> {
    let input_uri = s3_uri_from_file_id(&req.input_file_id)?;
    let (input_bucket, _) = split_s3_uri(&input_uri)?;

    let job_name = format!("batch-{}", uuid::Uuid::new_v4().simple());
    let output_bucket = target.s3_bucket.as_deref().unwrap_or(input_bucket);
    let output_uri = format!("s3://{}/batch-output/{}/", output_bucket, job_name);

    let mut output_config = json!({ "s3Uri": output_uri });
    if let Some(sse) = &target.sse {
        if let Some(key_id) = &sse.kms_key_id {
            output_config["s3EncryptionKeyId"] = json!(key_id);
        }
    }

    Ok(json!({
        "jobName": job_name,
        "modelId": target.require_model()?,
        "roleArn": target.require_role_arn()?,
        "inputDataConfig": { "s3InputDataConfig": { "s3Uri": input_uri } },
        "outputDataConfig": { "s3OutputDataConfig": output_config },
    }))
}

/// Map a GetModelInvocationJob (or list summary) body to the canonical batch.
pub fn parse_batch(body: &Value) -> Result<BatchJob, AppError> {
    let arn = body["jobArn"]
        .as_str()
        .ok_or_else(|| AppError::InvalidProviderResponse("job response missing jobArn".to_string()))?;
    let status = JobStatus::from_aws(body["status"].as_str().unwrap_or_default());

    let created_at = parse_time(&body["submitTime"]).unwrap_or(0);
    let ended_at = parse_time(&body["endTime"]);
    let modified_at = parse_time(&body["lastModifiedTime"]);

    let input_file_id = body["inputDataConfig"]["s3InputDataConfig"]["s3Uri"]
        .as_str()
        .map(file_id_from_s3_uri);
    let output_file_id = body["outputDataConfig"]["s3OutputDataConfig"]["s3Uri"]
        .as_str()
        .map(file_id_from_s3_uri);

    let errors = body["message"].as_str().map(|message| {
        vec![JobError {
            message: message.to_string(),
            code: None,
        }]
    });

    Ok(BatchJob {
        id: urlencoding::encode(arn).into_owned(),
        object: "batch".to_string(),
        endpoint: "/v1/chat/completions".to_string(),
        input_file_id: input_file_id.unwrap_or_default(),
        completion_window: "24h".to_string(),
        status,
        output_file_id,
        error_file_id: None,
        created_at,
        in_progress_at: matches!(status, JobStatus::InProgress).then_some(modified_at).flatten(),
        finalizing_at: None,
        completed_at: matches!(status, JobStatus::Completed).then_some(ended_at).flatten(),
        failed_at: matches!(status, JobStatus::Failed).then_some(ended_at).flatten(),
        expired_at: matches!(status, JobStatus::Expired).then_some(ended_at).flatten(),
        cancelling_at: matches!(status, JobStatus::Cancelling).then_some(modified_at).flatten(),
        cancelled_at: matches!(status, JobStatus::Cancelled).then_some(ended_at).flatten(),
        request_counts: None,
        errors,
    })
}

/// Map a ListModelInvocationJobs body to the canonical list.
pub fn parse_batch_list(body: &Value) -> Result<ListResponse<BatchJob>, AppError> {
    let summaries = body["invocationJobSummaries"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let data = summaries
        .iter()
        .map(parse_batch)
        .collect::<Result<Vec<_>, _>>()?;

    let mut list = ListResponse::new(data);
    list.first_id = list.data.first().map(|j| j.id.clone());
    list.last_id = list.data.last().map(|j| j.id.clone());
    list.has_more = body["nextToken"].is_string();
    Ok(list)
}

/// Build the CreateModelCustomizationJob body for a canonical fine-tune.
pub fn create_finetune_body(
    req: &CreateFineTuningJobRequest,
    target: &ProviderTarget,
) -> Result<Value, AppError> {
    let training_uri = s3_uri_from_file_id(&req.training_file)?;
    let (training_bucket, _) = split_s3_uri(&training_uri)?;

    let job_name = format!("ft-{}", uuid::Uuid::new_v4().simple());
    let model_name = match &req.suffix {
        Some(suffix) => format!("ft-{}", suffix),
        None => job_name.clone(),
    };
    let output_bucket = target.s3_bucket.as_deref().unwrap_or(training_bucket);

    let mut body = json!({
        "jobName": job_name,
        "customModelName": model_name,
        "roleArn": target.require_role_arn()?,
        "baseModelIdentifier": req.model,
        "trainingDataConfig": { "s3Uri": training_uri },
        "outputDataConfig": {
            "s3Uri": format!("s3://{}/finetune-output/{}/", output_bucket, job_name)
        },
        "hyperParameters": hyper_parameters(req.hyperparameters.as_ref()),
    });

    if let Some(validation_file) = &req.validation_file {
        let validation_uri = s3_uri_from_file_id(validation_file)?;
        body["validationDataConfig"] = json!({ "validators": [{ "s3Uri": validation_uri }] });
    }
    if let Some(sse) = &target.sse {
        if let Some(key_id) = &sse.kms_key_id {
            body["customModelKmsKeyId"] = json!(key_id);
        }
    }

    Ok(body)
}

/// Bedrock hyper-parameters are a string→string map.
fn hyper_parameters(params: Option<&Hyperparameters>) -> Value {
    let mut out = Map::new();
    if let Some(params) = params {
        if let Some(epochs) = &params.n_epochs {
            if !epochs.is_null() && epochs != "auto" {
                out.insert("epochCount".to_string(), json!(stringify(epochs)));
            }
        }
        if let Some(batch) = &params.batch_size {
            if !batch.is_null() && batch != "auto" {
                out.insert("batchSize".to_string(), json!(stringify(batch)));
            }
        }
        if let Some(lr) = &params.learning_rate_multiplier {
            if !lr.is_null() && lr != "auto" {
                out.insert(
                    "learningRateMultiplier".to_string(),
                    json!(stringify(lr)),
                );
            }
        }
    }
    Value::Object(out)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a GetModelCustomizationJob body to the canonical fine-tuning job.
pub fn parse_finetune(body: &Value) -> Result<FineTuningJob, AppError> {
    let arn = body["jobArn"]
        .as_str()
        .ok_or_else(|| AppError::InvalidProviderResponse("job response missing jobArn".to_string()))?;
    let status = JobStatus::from_aws(body["status"].as_str().unwrap_or_default());

    let hyper = &body["hyperParameters"];
    let hyperparameters = Hyperparameters {
        n_epochs: hyper["epochCount"].as_str().map(parse_number),
        batch_size: hyper["batchSize"].as_str().map(parse_number),
        learning_rate_multiplier: hyper["learningRateMultiplier"].as_str().map(parse_number),
    };

    Ok(FineTuningJob {
        id: urlencoding::encode(arn).into_owned(),
        object: "fine_tuning.job".to_string(),
        model: body["baseModelArn"]
            .as_str()
            .or_else(|| body["baseModelIdentifier"].as_str())
            .unwrap_or_default()
            .to_string(),
        created_at: parse_time(&body["creationTime"]).unwrap_or(0),
        finished_at: parse_time(&body["endTime"]),
        fine_tuned_model: body["outputModelName"]
            .as_str()
            .or_else(|| body["customModelName"].as_str())
            .map(str::to_string),
        status,
        training_file: body["trainingDataConfig"]["s3Uri"]
            .as_str()
            .map(file_id_from_s3_uri)
            .unwrap_or_default(),
        validation_file: body["validationDataConfig"]["validators"][0]["s3Uri"]
            .as_str()
            .map(file_id_from_s3_uri),
        hyperparameters,
        result_files: body["outputDataConfig"]["s3Uri"]
            .as_str()
            .map(|uri| vec![file_id_from_s3_uri(uri)])
            .unwrap_or_default(),
        error: body["failureMessage"].as_str().map(|message| JobError {
            message: message.to_string(),
            code: None,
        }),
    })
}

/// Map a ListModelCustomizationJobs body to the canonical list.
pub fn parse_finetune_list(body: &Value) -> Result<ListResponse<FineTuningJob>, AppError> {
    let summaries = body["modelCustomizationJobSummaries"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let data = summaries
        .iter()
        .map(parse_finetune)
        .collect::<Result<Vec<_>, _>>()?;

    let mut list = ListResponse::new(data);
    list.first_id = list.data.first().map(|j| j.id.clone());
    list.last_id = list.data.last().map(|j| j.id.clone());
    list.has_more = body["nextToken"].is_string();
    Ok(list)
}

fn parse_number(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .or_else(|_| raw.parse::<f64>().map(Value::from))
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_time(value: &Value) -> Option<i64> {
    let raw = value.as_str()?;
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.timestamp())
}
